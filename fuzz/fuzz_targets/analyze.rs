#![no_main]
use libfuzzer_sys::fuzz_target;

use dosflow::{AddressSpace, Analyzer, EntryPoint, LogicalAddress, Referent};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let entry = u16::from_le_bytes([data[0], data[1]]);
    let code = data[2..].to_vec();
    let len = code.len();
    let mut space = AddressSpace::new();
    let image = space.add_image("fuzz.bin", code);
    let Ok(text) = space.add_segment("_TEXT", "CODE", image, 0, len) else {
        return;
    };
    let _ = space.set_frame_base(image, 0);
    let mut analyzer = Analyzer::new(space);
    let _ = analyzer.analyze(&[EntryPoint::new(LogicalAddress::new(
        Referent::Segment(text),
        entry,
    ))]);
    let _ = analyzer.report().to_json();
});
