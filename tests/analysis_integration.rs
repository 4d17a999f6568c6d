mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{block_ranges, Program};
use dosflow::config::AnalysisConfig;
use dosflow::core::basic_block::BlockExit;
use dosflow::core::control_flow_graph::ControlFlowEdgeKind;
use dosflow::core::diagnostics::ErrorCode;
use dosflow::core::fixup::{Fixup, FixupLocation, FixupMode, SymbolicTarget};
use dosflow::core::procedure::CallType;
use dosflow::core::reference::XRefType;
use dosflow::{AnalysisReport, Analyzer, Referent};

fn count_kind(analyzer: &Analyzer, kind: XRefType) -> usize {
    analyzer.xrefs().iter().filter(|x| x.kind() == kind).count()
}

#[test]
fn test_straight_line_procedure() {
    // push bp; mov bp, sp; pop bp; ret
    let analyzer = Program::new(&[0x55, 0x8B, 0xEC, 0x5D, 0xC3]).analyze(&[0]);
    assert_eq!(block_ranges(&analyzer), vec![(0, 5)]);
    assert!(analyzer.errors().is_empty());
    assert_eq!(analyzer.instruction_count(), 4);

    let main = analyzer.procedures().iter().next().unwrap();
    assert_eq!(main.name, "sub__TEXT_0000");
    assert_eq!(main.call_type, CallType::Near);
    assert_eq!(main.blocks.len(), 1);
}

#[test]
fn test_jump_table_stops_at_attributed_data() {
    // jmp word ptr cs:[bx+5]; dw 000Bh, 000Ch; db 0AAh, 0AAh; ret; ret
    let mut program = Program::new(&[
        0x2E, 0xFF, 0xA7, 0x05, 0x00, 0x0B, 0x00, 0x0C, 0x00, 0xAA, 0xAA, 0xC3, 0xC3,
    ]);
    program.mark_data(9, 2);
    let entry = program.resolved(0);
    let analyzer = program.analyze(&[0]);

    assert_eq!(count_kind(&analyzer, XRefType::NearIndexedJump), 2);
    assert!(analyzer.xrefs().dynamic().next().is_none());
    assert_eq!(block_ranges(&analyzer), vec![(0, 5), (11, 12), (12, 13)]);
    assert!(!analyzer.errors().has_errors());

    let slots: Vec<usize> = analyzer.data_items().iter().map(|d| d.address.offset).collect();
    assert_eq!(slots, vec![5, 7]);
    assert!(analyzer.data_items().iter().all(|d| d.owner == Some(entry)));

    let main = analyzer.procedures().get(entry).unwrap();
    let starts: Vec<usize> = main.blocks.iter().map(|b| b.offset).collect();
    assert_eq!(starts, vec![0, 11, 12]);
}

#[test]
fn test_jump_table_stops_at_segment_boundary() {
    // The third slot lies in LIB_TEXT.
    let mut program = Program::with_text_len(
        &[
            0x2E, 0xFF, 0xA7, 0x05, 0x00, 0x0B, 0x00, 0x0C, 0x00, 0x0D, 0x00, 0xC3, 0xC3, 0xC3,
        ],
        9,
    );
    program
        .space
        .add_segment("LIB_TEXT", "CODE", program.image, 9, 5)
        .unwrap();
    let analyzer = program.analyze(&[0]);

    let targets: Vec<u16> = analyzer
        .xrefs()
        .iter()
        .filter(|x| x.kind() == XRefType::NearIndexedJump)
        .filter_map(|x| x.target().map(|t| t.offset))
        .collect();
    assert_eq!(targets, vec![0x0B, 0x0C]);
    assert_eq!(analyzer.data_items().len(), 2);
    assert_eq!(block_ranges(&analyzer), vec![(0, 5), (11, 12), (12, 13)]);
    assert!(analyzer.errors().is_empty());
}

#[test]
fn test_jump_table_stops_at_target_inside_instruction() {
    // The second slot points at the jump's second byte.
    let analyzer = Program::new(&[
        0x2E, 0xFF, 0xA7, 0x05, 0x00, 0x0B, 0x00, 0x01, 0x00, 0xAA, 0xAA, 0xC3,
    ])
    .analyze(&[0]);

    assert_eq!(count_kind(&analyzer, XRefType::NearIndexedJump), 1);
    assert_eq!(analyzer.data_items().len(), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 5), (11, 12)]);
    assert!(analyzer.errors().is_empty());
}

#[test]
fn test_jump_table_heuristic_disabled() {
    let mut config = AnalysisConfig::default();
    config.heuristics.jump_tables = false;
    let analyzer = Program::new(&[0x2E, 0xFF, 0xA7, 0x05, 0x00, 0x0B, 0x00, 0xC3])
        .analyze_with(&[0], config);
    assert_eq!(count_kind(&analyzer, XRefType::NearIndexedJump), 0);
    assert_eq!(analyzer.errors().count(ErrorCode::DynamicTarget), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 5)]);
}

#[test]
fn test_dynamic_call_target() {
    // call ax; ret
    let program = Program::new(&[0xFF, 0xD0, 0xC3]);
    let source = program.at(0);
    let analyzer = program.analyze(&[0]);

    assert_eq!(analyzer.errors().count(ErrorCode::DynamicTarget), 1);
    let dynamic: Vec<_> = analyzer.xrefs().dynamic().collect();
    assert_eq!(dynamic.len(), 1);
    assert_eq!(dynamic[0].source(), Some(&source));
    assert_eq!(dynamic[0].kind(), XRefType::NearCall);
    // The call does not end the block.
    assert_eq!(block_ranges(&analyzer), vec![(0, 3)]);
}

#[test]
fn test_conditional_jump_both_paths() {
    // je +1; nop; ret
    let analyzer = Program::new(&[0x74, 0x01, 0x90, 0xC3]).analyze(&[0]);

    assert_eq!(count_kind(&analyzer, XRefType::ConditionalJump), 2);
    assert_eq!(block_ranges(&analyzer), vec![(0, 2), (2, 3), (3, 4)]);
    let blocks: Vec<BlockExit> = analyzer.blocks().iter().map(|b| b.exit).collect();
    assert_eq!(
        blocks,
        vec![BlockExit::Conditional, BlockExit::FallThrough, BlockExit::Terminated]
    );

    let cfg = analyzer.control_flow_graph();
    let entry = analyzer.blocks().iter().next().unwrap().start_address();
    assert_eq!(cfg.successors(&entry).len(), 2);
    let middle = analyzer.blocks().iter().nth(1).unwrap().start_address();
    let out = cfg.outgoing_edges(&middle);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, ControlFlowEdgeKind::Fallthrough);
}

#[test]
fn test_conditional_without_fallthrough_xrefs() {
    let mut config = AnalysisConfig::default();
    config.xrefs.emit_fallthrough = false;
    let analyzer = Program::new(&[0x74, 0x01, 0x90, 0xC3]).analyze_with(&[0], config);

    assert_eq!(count_kind(&analyzer, XRefType::ConditionalJump), 1);
    // The not-taken path is still analyzed and linked.
    assert_eq!(block_ranges(&analyzer), vec![(0, 2), (2, 3), (3, 4)]);
    let entry = analyzer.blocks().iter().next().unwrap().start_address();
    let kinds: Vec<ControlFlowEdgeKind> = analyzer
        .control_flow_graph()
        .outgoing_edges(&entry)
        .iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&ControlFlowEdgeKind::Fallthrough));
    assert!(kinds.contains(&ControlFlowEdgeKind::Branch));
}

#[test]
fn test_second_entry_splits_block() {
    let program = Program::new(&[0x90, 0x90, 0xC3]);
    let analyzer = program.analyze(&[0, 1]);

    assert_eq!(block_ranges(&analyzer), vec![(0, 1), (1, 3)]);
    let first = analyzer.blocks().iter().next().unwrap();
    assert_eq!(first.exit, BlockExit::FallThrough);
    assert_eq!(analyzer.control_flow_graph().edge_count(), 1);

    // Each entry owns its own block; the fall-through does not cross entries.
    assert_eq!(analyzer.procedures().len(), 2);
    assert!(analyzer.procedures().iter().all(|p| p.blocks.len() == 1));
}

#[test]
fn test_near_and_far_calls_to_same_procedure() {
    // call 000Ah; call far 0000:000Ah; ret; nop; ret
    let mut program = Program::new(&[
        0xE8, 0x07, 0x00, 0x9A, 0x0A, 0x00, 0x00, 0x00, 0xC3, 0x90, 0xC3,
    ]);
    program.space.set_frame_base(program.image, 0).unwrap();
    let callee = program.resolved(10);
    let analyzer = program.analyze(&[0]);

    assert_eq!(analyzer.errors().count(ErrorCode::InconsistentCall), 1);
    assert_eq!(analyzer.procedures().len(), 2);
    let procedure = analyzer.procedures().get(callee).unwrap();
    assert_eq!(procedure.call_type, CallType::Near);
    assert_eq!(procedure.name, "sub__TEXT_000A");
    assert_eq!(analyzer.procedures().calls().len(), 2);
    assert_eq!(block_ranges(&analyzer), vec![(0, 9), (10, 11)]);
}

#[test]
fn test_far_call_without_frame_base_is_unresolved() {
    let analyzer = Program::new(&[0x9A, 0x00, 0x00, 0x00, 0x10, 0xC3]).analyze(&[0]);
    assert_eq!(analyzer.errors().count(ErrorCode::UnresolvedTarget), 1);
    assert_eq!(analyzer.procedures().len(), 1);
}

#[test]
fn test_fixed_up_call_reaches_public() {
    // _TEXT: call _helper; ret    LIB_TEXT: nop; ret
    let mut program = Program::with_text_len(&[0xE8, 0x00, 0x00, 0xC3, 0x90, 0xC3], 4);
    let lib = program
        .space
        .add_segment("LIB_TEXT", "CODE", program.image, 4, 2)
        .unwrap();
    program
        .space
        .add_public("_helper", dosflow::LogicalAddress::new(Referent::Segment(lib), 1))
        .unwrap();
    let helper = program.space.add_external("_helper");
    program.fixup(Fixup::new(
        1,
        FixupLocation::Offset16,
        FixupMode::SelfRelative,
        SymbolicTarget::new(Referent::External(helper), 0),
    ));
    let target = program.resolved(5);
    let analyzer = program.analyze(&[0]);

    assert!(analyzer.errors().is_empty(), "{:?}", analyzer.errors());
    assert_eq!(block_ranges(&analyzer), vec![(0, 4), (5, 6)]);
    let procedure = analyzer.procedures().by_name("_helper").unwrap();
    assert_eq!(procedure.entry, target);
    assert_eq!(procedure.address.referent, Referent::Segment(lib));
}

#[test]
fn test_unresolved_external_call_is_dynamic() {
    let mut program = Program::new(&[0xE8, 0x00, 0x00, 0xC3]);
    let missing = program.space.add_external("_missing");
    program.fixup(Fixup::new(
        1,
        FixupLocation::Offset16,
        FixupMode::SelfRelative,
        SymbolicTarget::new(Referent::External(missing), 0),
    ));
    let analyzer = program.analyze(&[0]);

    assert_eq!(analyzer.errors().count(ErrorCode::DynamicTarget), 1);
    assert!(!analyzer.errors().has_errors());
    assert_eq!(analyzer.procedures().len(), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 4)]);
}

#[test]
fn test_broken_fixup() {
    let mut program = Program::new(&[0xE8, 0x00, 0x00, 0xC3]);
    let ext = program.space.add_external("_f");
    program.fixup(Fixup::new(
        0,
        FixupLocation::Offset16,
        FixupMode::SelfRelative,
        SymbolicTarget::new(Referent::External(ext), 0),
    ));
    let analyzer = program.analyze(&[0]);

    assert_eq!(analyzer.errors().count(ErrorCode::BrokenFixup), 1);
    assert!(analyzer.blocks().is_empty());
}

#[test]
fn test_address_wrap() {
    let analyzer = Program::new(&vec![0x90; 0x1_0000]).analyze(&[0xFFFF]);
    assert_eq!(analyzer.errors().count(ErrorCode::AddressWrapped), 1);
    let block = analyzer.blocks().iter().next().unwrap();
    assert_eq!((block.start, block.end), (0xFFFF, 0x1_0000));
    assert_eq!(block.exit, BlockExit::Incomplete);
}

#[test]
fn test_jump_into_data() {
    // jmp short +1; ret; db 0AAh
    let mut program = Program::new(&[0xEB, 0x01, 0xC3, 0xAA]);
    program.mark_data(3, 1);
    let analyzer = program.analyze(&[0]);
    assert_eq!(analyzer.errors().count(ErrorCode::RanIntoData), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 2)]);
}

#[test]
fn test_entry_on_padding() {
    // jmp short +1; (padding); ret
    let mut program = Program::new(&[0xEB, 0x01, 0x90, 0xC3]);
    program
        .space
        .image_mut(program.image)
        .unwrap()
        .mark_padding(2, 1)
        .unwrap();
    let analyzer = program.analyze(&[0, 2]);
    assert_eq!(analyzer.errors().count(ErrorCode::RanIntoData), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 2), (3, 4)]);
}

#[test]
fn test_jump_into_own_instruction() {
    // jmp short -1 lands on its own displacement byte
    let analyzer = Program::new(&[0xEB, 0xFF]).analyze(&[0]);
    assert_eq!(analyzer.errors().count(ErrorCode::RanIntoCode), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 2)]);
}

#[test]
fn test_overlapping_instruction() {
    // From 1: nop; ret. From 0: mov ax, 0C390h would cover both.
    let analyzer = Program::new(&[0xB8, 0x90, 0xC3]).analyze(&[1, 0]);
    assert_eq!(analyzer.errors().count(ErrorCode::OverlappingInstruction), 1);
    assert_eq!(block_ranges(&analyzer), vec![(1, 3)]);
}

#[test]
fn test_invalid_instruction_ends_block() {
    // nop; then a truncated near call
    let analyzer = Program::new(&[0x90, 0xE8, 0x01]).analyze(&[0]);
    assert_eq!(analyzer.errors().count(ErrorCode::InvalidInstruction), 1);
    let block = analyzer.blocks().iter().next().unwrap();
    assert_eq!((block.start, block.end, block.exit), (0, 1, BlockExit::Incomplete));
}

#[test]
fn test_instruction_limit() {
    let mut config = AnalysisConfig::default();
    config.limits.max_instructions = 1;
    let analyzer = Program::new(&[0x90, 0x90, 0xC3]).analyze_with(&[0], config);
    assert_eq!(analyzer.instruction_count(), 1);
    assert_eq!(block_ranges(&analyzer), vec![(0, 1)]);
}

#[test]
fn test_segment_overlap_reported_once() {
    let mut program = Program::with_text_len(&[0x90; 150], 100);
    let second = program
        .space
        .add_segment("_DATA", "DATA", program.image, 50, 100)
        .unwrap();
    let mut analyzer = Analyzer::new(program.space);
    assert_eq!(analyzer.check_segment_overlaps(), 1);
    let diag = analyzer.errors().iter().next().unwrap();
    assert_eq!(diag.code, ErrorCode::SegmentOverlap);
    assert_eq!(
        diag.location,
        Some(dosflow::LogicalAddress::new(Referent::Segment(second), 0))
    );
}

#[test]
fn test_observer_sees_every_recorded_xref() {
    let seen = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&seen);
    let program = Program::new(&[0x74, 0x01, 0x90, 0xC3]);
    let entry = dosflow::EntryPoint::new(program.at(0));
    let mut analyzer = Analyzer::new(program.space);
    analyzer.subscribe(move |_| counter.set(counter.get() + 1));
    analyzer.analyze(&[entry]).unwrap();
    assert_eq!(seen.get(), analyzer.xrefs().len());
    assert_eq!(seen.get(), 3);
}

#[test]
fn test_report_json() {
    let analyzer = Program::new(&[0xE8, 0x01, 0x00, 0xC3, 0xC3]).analyze(&[0]);
    let report = analyzer.report();
    assert_eq!(report.blocks.len(), 2);
    assert_eq!(report.procedures.len(), 2);
    let json = report.to_json().unwrap();
    assert!(json.contains("\"procedures\""));
    assert_eq!(AnalysisReport::from_json(&json).unwrap(), report);
}
