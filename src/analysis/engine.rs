//! Worklist-driven flow analysis.
//!
//! The [`Analyzer`] discovers basic blocks from entry points, then derives
//! the control flow graph and the procedures, and finally validates the
//! segment layout. Findings are appended to an [`ErrorList`]; only broken
//! engine invariants are returned as errors.

use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info, trace, warn};

use crate::analysis::fixup_resolver::branch_target;
use crate::analysis::jump_table;
use crate::analysis::layout;
use crate::analysis::report::AnalysisReport;
use crate::config::AnalysisConfig;
use crate::core::address::{LogicalAddress, ResolvedAddress};
use crate::core::address_space::AddressSpace;
use crate::core::basic_block::{BasicBlock, BasicBlockCollection, BlockExit};
use crate::core::control_flow_graph::{ControlFlowEdge, ControlFlowEdgeKind, ControlFlowGraph};
use crate::core::diagnostics::{ErrorCode, ErrorList};
use crate::core::disassembler::{DecodeError, Decoder};
use crate::core::instruction::{FlowKind, Instruction};
use crate::core::procedure::{CallType, DataItem, Procedure, ProcedureCollection};
use crate::core::reference::{XRef, XRefCollection, XRefType};
use crate::core::worklist::Worklist;
use crate::disasm::IcedDecoder;
use crate::error::{DosflowError, Result};

/// Where analysis starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub address: LogicalAddress,
    pub name: Option<String>,
    pub call_type: CallType,
}

impl EntryPoint {
    /// A near entry point without a name.
    pub fn new(address: LogicalAddress) -> Self {
        Self {
            address,
            name: None,
            call_type: CallType::Near,
        }
    }

    /// A near entry point whose procedure is called `name`.
    pub fn named(address: LogicalAddress, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(address)
        }
    }

    /// Mark the entry as reached by far calls.
    pub fn far(mut self) -> Self {
        self.call_type = CallType::Far;
        self
    }
}

/// A pending worklist item.
#[derive(Debug, Clone, Copy)]
struct Task {
    xref: XRef,
    /// Whether the reference is kept once processed
    record: bool,
}

impl Task {
    fn recorded(xref: XRef) -> Self {
        Self { xref, record: true }
    }
}

fn task_order(a: &Task, b: &Task) -> Ordering {
    XRef::priority_order(&a.xref, &b.xref)
}

type TaskList = Worklist<Task, fn(&Task, &Task) -> Ordering>;

/// A consumed jump-table slot and the jump that reads it.
#[derive(Debug, Clone, Copy)]
struct SlotRecord {
    slot: ResolvedAddress,
    location: LogicalAddress,
    jump: LogicalAddress,
}

pub struct Analyzer<D: Decoder = IcedDecoder> {
    space: AddressSpace,
    decoder: D,
    config: AnalysisConfig,
    entries: Vec<EntryPoint>,
    xrefs: XRefCollection,
    blocks: BasicBlockCollection,
    procedures: ProcedureCollection,
    cfg: ControlFlowGraph,
    slots: Vec<SlotRecord>,
    data_items: Vec<DataItem>,
    errors: ErrorList,
    instructions: usize,
}

impl Analyzer<IcedDecoder> {
    /// An analyzer with the iced-x86 decoder and default configuration.
    pub fn new(space: AddressSpace) -> Self {
        Self::with_decoder(space, IcedDecoder::new(), AnalysisConfig::default())
    }
}

impl<D: Decoder> Analyzer<D> {
    /// An analyzer using a custom decoder.
    pub fn with_decoder(space: AddressSpace, decoder: D, config: AnalysisConfig) -> Self {
        Self {
            space,
            decoder,
            config,
            entries: Vec::new(),
            xrefs: XRefCollection::new(),
            blocks: BasicBlockCollection::new(),
            procedures: ProcedureCollection::new(),
            cfg: ControlFlowGraph::new(),
            slots: Vec::new(),
            data_items: Vec::new(),
            errors: ErrorList::new(),
            instructions: 0,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an observer called after each cross-reference is recorded.
    pub fn subscribe(&mut self, observer: impl FnMut(&XRef) + 'static) {
        self.xrefs.subscribe(observer);
    }

    /// Run every phase for `entries`.
    pub fn analyze(&mut self, entries: &[EntryPoint]) -> Result<()> {
        let span = crate::phase_span!("analyze", entries = entries.len());
        let _guard = span.enter();

        self.generate_basic_blocks(entries)?;
        self.generate_control_flow_graph()?;
        self.generate_procedures()?;
        if self.config.layout.check_segment_overlaps {
            self.check_segment_overlaps();
        }
        info!(
            blocks = self.blocks.len(),
            procedures = self.procedures.len(),
            xrefs = self.xrefs.len(),
            diagnostics = self.errors.len(),
            "analysis complete"
        );
        Ok(())
    }

    /// Discover basic blocks reachable from `entries`.
    pub fn generate_basic_blocks(&mut self, entries: &[EntryPoint]) -> Result<()> {
        let span = crate::phase_span!("basic_blocks");
        let _guard = span.enter();

        let order: fn(&Task, &Task) -> Ordering = task_order;
        let mut worklist: TaskList = Worklist::with_order(order);
        for entry in entries {
            self.entries.push(entry.clone());
            worklist.enqueue(Task::recorded(XRef::entry(entry.address)));
        }

        let mut processed = 0usize;
        while let Ok(task) = worklist.dequeue() {
            if processed >= self.config.limits.max_worklist_items {
                warn!(
                    limit = self.config.limits.max_worklist_items,
                    pending = worklist.len() + 1,
                    "worklist limit reached"
                );
                break;
            }
            if self.instructions >= self.config.limits.max_instructions {
                warn!(
                    limit = self.config.limits.max_instructions,
                    pending = worklist.len() + 1,
                    "instruction limit reached"
                );
                break;
            }
            processed += 1;
            self.process(task, &mut worklist)?;
        }

        info!(
            blocks = self.blocks.len(),
            xrefs = self.xrefs.len(),
            instructions = self.instructions,
            "basic blocks generated"
        );
        Ok(())
    }

    fn process(&mut self, task: Task, worklist: &mut TaskList) -> Result<()> {
        let xref = task.xref;
        if xref.kind() == XRefType::NearIndexedJump
            && xref.target().is_none()
            && xref.data_location().is_some()
        {
            match jump_table::read_slot(&xref, &mut self.space) {
                Ok(slot) => {
                    if let Some(source) = xref.source() {
                        self.slots.push(SlotRecord {
                            slot: slot.slot,
                            location: slot.location,
                            jump: *source,
                        });
                    }
                    worklist.enqueue(Task::recorded(slot.xref));
                    if let Some(next) = slot.next {
                        worklist.enqueue(Task::recorded(next));
                    }
                }
                Err(end) => debug!(xref = %xref, reason = ?end, "jump table ended"),
            }
            return Ok(());
        }

        if let Some(target) = xref.target().copied() {
            match self.space.resolve(&target) {
                None => self.errors.push(
                    xref.source().copied().or(Some(target)),
                    ErrorCode::UnresolvedTarget,
                    format!("{} does not resolve", self.space.display(&target)),
                ),
                Some(start) => {
                    let in_image = self
                        .space
                        .image(start.image)
                        .is_some_and(|image| image.contains(start.offset));
                    if in_image {
                        self.analyze_block(target, start, worklist)?;
                    } else {
                        self.errors.push(
                            xref.source().copied().or(Some(target)),
                            ErrorCode::OutOfImage,
                            format!("{} resolves outside its image", self.space.display(&target)),
                        );
                    }
                }
            }
        }

        if task.record {
            self.xrefs.add(xref)?;
        }
        Ok(())
    }

    /// Analyze one basic block starting at `target`.
    ///
    /// Returns the new block, or `None` if no block was created here.
    fn analyze_block(
        &mut self,
        target: LogicalAddress,
        start: ResolvedAddress,
        worklist: &mut TaskList,
    ) -> Result<Option<BasicBlock>> {
        let attrs = match self.space.image(start.image) {
            Some(image) => image.attributes(start.offset),
            None => return Ok(None),
        };
        if attrs.is_data() {
            self.errors.push(
                Some(target),
                ErrorCode::RanIntoData,
                format!("{} is data", self.space.display(&target)),
            );
            return Ok(None);
        }
        if attrs.is_code() && !attrs.is_lead() {
            self.errors.push(
                Some(target),
                ErrorCode::RanIntoCode,
                format!("{} is inside an instruction", self.space.display(&target)),
            );
            return Ok(None);
        }
        if attrs.is_code() {
            self.split_at(start)?;
            return Ok(None);
        }

        let mut here = target;
        let mut offset = start.offset;
        let mut end = start.offset;
        let exit = loop {
            if self.instructions >= self.config.limits.max_instructions {
                break BlockExit::Incomplete;
            }
            let decoded = match self.space.image(start.image) {
                Some(image) => self.decoder.decode(image, offset, here.offset),
                None => break BlockExit::Incomplete,
            };
            let instr = match decoded {
                Ok(instr) => instr,
                Err(err @ DecodeError::BrokenFixup { .. }) => {
                    self.errors.push(Some(here), ErrorCode::BrokenFixup, err.to_string());
                    break BlockExit::Incomplete;
                }
                Err(err) => {
                    self.errors.push(Some(here), ErrorCode::InvalidInstruction, err.to_string());
                    break BlockExit::Incomplete;
                }
            };

            if let Some(code) = self.overlap(offset, instr.end(), start) {
                self.errors.push(
                    Some(here),
                    code,
                    format!("{} overlaps analyzed bytes", instr.text),
                );
                break BlockExit::Incomplete;
            }
            if let Some(image) = self.space.image_mut(start.image) {
                image.mark_code(offset, instr.length)?;
            }
            self.instructions += 1;
            end = instr.end();
            trace!(at = %here, text = %instr.text, "decoded");

            let next = here.checked_add(instr.length as u16);
            match instr.flow {
                FlowKind::Return | FlowKind::Halt => break BlockExit::Terminated,
                FlowKind::Jump { far } => {
                    self.jump(&instr, here, far, worklist);
                    break BlockExit::Terminated;
                }
                FlowKind::ConditionalJump => {
                    self.conditional(&instr, here, next.as_ref().ok().copied(), worklist);
                    if next.is_err() {
                        self.wrapped(here, &instr);
                        break BlockExit::Incomplete;
                    }
                    break BlockExit::Conditional;
                }
                FlowKind::Call { far } => self.call(&instr, here, far, worklist),
                FlowKind::Next | FlowKind::Interrupt => {}
            }

            let Ok(next) = next else {
                self.wrapped(here, &instr);
                break BlockExit::Incomplete;
            };
            here = next;
            offset = instr.end();

            let attrs = match self.space.image(start.image) {
                Some(image) => image.attributes(offset),
                None => break BlockExit::Incomplete,
            };
            if attrs.is_code() && attrs.is_lead() {
                self.split_at(ResolvedAddress::new(start.image, offset))?;
                break BlockExit::FallThrough;
            }
        };

        if end <= start.offset {
            return Ok(None);
        }
        let block = BasicBlock::new(start.image, start.offset, end, exit);
        self.blocks.add(block)?;
        debug!(block = %block, exit = ?exit, "basic block");
        Ok(Some(block))
    }

    /// Error code if `start..end` runs into attributed bytes.
    fn overlap(&self, start: usize, end: usize, block: ResolvedAddress) -> Option<ErrorCode> {
        let image = self.space.image(block.image)?;
        if image.is_unattributed(start, end) {
            return None;
        }
        let end = end.min(image.len());
        if (start..end).any(|i| image.attributes(i).is_data()) {
            Some(ErrorCode::RanIntoData)
        } else {
            Some(ErrorCode::OverlappingInstruction)
        }
    }

    /// Split the block containing `at` if `at` lies strictly inside it.
    fn split_at(&mut self, at: ResolvedAddress) -> Result<()> {
        let Some(block) = self.blocks.find(at).copied() else {
            return Ok(());
        };
        if block.start == at.offset {
            return Ok(());
        }
        let Some(image) = self.space.image(at.image) else {
            return Ok(());
        };
        let (first, second) = self.blocks.split(&block, at.offset, image)?;
        debug!(first = %first, second = %second, "split block");
        Ok(())
    }

    fn wrapped(&mut self, here: LogicalAddress, instr: &Instruction) {
        self.errors.push(
            Some(here),
            ErrorCode::AddressWrapped,
            format!("address after {} wraps", instr.text),
        );
    }

    fn dynamic(&mut self, here: LogicalAddress, instr: &Instruction) {
        self.errors.push(
            Some(here),
            ErrorCode::DynamicTarget,
            instr.text.clone(),
        );
    }

    fn jump(
        &mut self,
        instr: &Instruction,
        here: LogicalAddress,
        far: bool,
        worklist: &mut TaskList,
    ) {
        if !far && self.config.heuristics.jump_tables {
            if let Some(slot) = jump_table::table_start(instr, &here, &self.space) {
                debug!(at = %here, table = %slot, "jump table");
                worklist.enqueue(Task::recorded(XRef::indexed(here, slot)));
                return;
            }
        }
        let kind = if far {
            XRefType::FarJump
        } else {
            XRefType::NearJump
        };
        self.branch(instr, here, kind, worklist);
    }

    fn call(
        &mut self,
        instr: &Instruction,
        here: LogicalAddress,
        far: bool,
        worklist: &mut TaskList,
    ) {
        let kind = if far {
            XRefType::FarCall
        } else {
            XRefType::NearCall
        };
        self.branch(instr, here, kind, worklist);
    }

    fn conditional(
        &mut self,
        instr: &Instruction,
        here: LogicalAddress,
        next: Option<LogicalAddress>,
        worklist: &mut TaskList,
    ) {
        self.branch(instr, here, XRefType::ConditionalJump, worklist);
        let Some(next) = next else {
            return;
        };
        if let Ok(xref) = XRef::new(Some(here), Some(next), XRefType::ConditionalJump) {
            worklist.enqueue(Task {
                xref,
                record: self.config.xrefs.emit_fallthrough,
            });
        }
    }

    fn branch(
        &mut self,
        instr: &Instruction,
        here: LogicalAddress,
        kind: XRefType,
        worklist: &mut TaskList,
    ) {
        let target = branch_target(instr, &here, &self.space);
        if target.is_none() {
            self.dynamic(here, instr);
        }
        match XRef::new(Some(here), target, kind) {
            Ok(xref) => worklist.enqueue(Task::recorded(xref)),
            Err(err) => warn!(at = %here, error = %err, "dropped reference"),
        }
    }

    /// Add control flow edges for every recorded reference and fall-through.
    pub fn generate_control_flow_graph(&mut self) -> Result<()> {
        let span = crate::phase_span!("control_flow_graph");
        let _guard = span.enter();

        for xref in self.xrefs.iter() {
            let (Some(source), Some(target)) = (xref.source(), xref.target()) else {
                continue;
            };
            let Some(from) = self.space.resolve(source) else {
                continue;
            };
            let block = self.blocks.find(from).ok_or_else(|| {
                DosflowError::Internal(format!("no basic block at source of {}", xref))
            })?;
            let Some(to) = self
                .space
                .resolve(target)
                .and_then(|t| self.blocks.starting_at(t))
            else {
                trace!(xref = %xref, "no block at target");
                continue;
            };
            self.cfg.add_edge(ControlFlowEdge::from_xref(
                block.start_address(),
                to.start_address(),
                xref.kind(),
            ));
        }

        for block in self.blocks.iter() {
            let falls = match block.exit {
                BlockExit::FallThrough => true,
                BlockExit::Conditional => !self.config.xrefs.emit_fallthrough,
                BlockExit::Terminated | BlockExit::Incomplete => false,
            };
            if !falls {
                continue;
            }
            if let Some(next) = self.blocks.starting_at(block.end_address()) {
                self.cfg.add_edge(ControlFlowEdge::fallthrough(
                    block.start_address(),
                    next.start_address(),
                ));
            }
        }

        info!(edges = self.cfg.edge_count(), "control flow graph generated");
        Ok(())
    }

    /// Create procedures for entry points and call targets, then link each
    /// procedure to the blocks it reaches.
    pub fn generate_procedures(&mut self) -> Result<()> {
        let span = crate::phase_span!("procedures");
        let _guard = span.enter();

        let entries = self.entries.clone();
        for entry in &entries {
            let Some(resolved) = self.space.resolve(&entry.address) else {
                continue;
            };
            if self.procedures.contains(resolved) {
                continue;
            }
            let name = entry
                .name
                .clone()
                .unwrap_or_else(|| self.procedure_name(&entry.address, resolved));
            self.procedures
                .add(Procedure::new(resolved, entry.address, name, entry.call_type))?;
        }

        let calls: Vec<XRef> = self.xrefs.iter().filter(|x| x.kind().is_call()).copied().collect();
        for xref in calls {
            let (Some(target), Some(call_type)) = (xref.target().copied(), CallType::of(xref.kind()))
            else {
                continue;
            };
            let Some(resolved) = self.space.resolve(&target) else {
                continue;
            };
            match self.procedures.get(resolved) {
                Some(existing) if existing.call_type != call_type => {
                    let message = format!(
                        "{} is called {} but was first seen as {}",
                        existing.name,
                        call_type.value(),
                        existing.call_type.value()
                    );
                    self.errors
                        .push(xref.source().copied(), ErrorCode::InconsistentCall, message);
                }
                Some(_) => {}
                None => {
                    let name = self.procedure_name(&target, resolved);
                    self.procedures
                        .add(Procedure::new(resolved, target, name, call_type))?;
                }
            }
            self.procedures.add_call(xref)?;
        }

        self.link_blocks();
        self.assign_data_items();
        info!(
            procedures = self.procedures.len(),
            data_items = self.data_items.len(),
            "procedures generated"
        );
        Ok(())
    }

    fn procedure_name(&self, address: &LogicalAddress, resolved: ResolvedAddress) -> String {
        match self.space.public_at(resolved) {
            Some(public) => public.name.clone(),
            None => format!(
                "sub_{}_{:04X}",
                self.space.label(&address.referent),
                address.offset
            ),
        }
    }

    /// Blocks reachable from each entry over non-call edges, stopping at
    /// other procedure entries.
    fn link_blocks(&mut self) {
        let entries: BTreeSet<ResolvedAddress> = self.procedures.entries().copied().collect();
        for &entry in &entries {
            let mut seen = BTreeSet::new();
            let mut queue = VecDeque::new();
            if self.blocks.starting_at(entry).is_some() {
                seen.insert(entry);
                queue.push_back(entry);
            }
            while let Some(block) = queue.pop_front() {
                for edge in self.cfg.outgoing_edges(&block) {
                    if edge.kind == ControlFlowEdgeKind::Call || entries.contains(&edge.to) {
                        continue;
                    }
                    if seen.insert(edge.to) {
                        queue.push_back(edge.to);
                    }
                }
            }
            if let Some(procedure) = self.procedures.get_mut(entry) {
                procedure.blocks = seen.into_iter().collect();
            }
        }
    }

    fn assign_data_items(&mut self) {
        self.data_items.clear();
        for record in &self.slots {
            let owner = self
                .space
                .resolve(&record.jump)
                .and_then(|jump| self.blocks.find(jump))
                .and_then(|block| self.procedures.containing_block(block.start_address()))
                .map(|procedure| procedure.entry);
            self.data_items.push(DataItem {
                address: record.slot,
                location: record.location,
                size: jump_table::SLOT_SIZE,
                owner,
            });
        }
    }

    /// Report overlapping segments.
    pub fn check_segment_overlaps(&mut self) -> usize {
        let span = crate::phase_span!("segment_layout");
        let _guard = span.enter();
        layout::check_segment_overlaps(&self.space, &mut self.errors)
    }

    /// Get the analyzed address space
    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Get every recorded cross-reference
    pub fn xrefs(&self) -> &XRefCollection {
        &self.xrefs
    }

    /// Get the discovered basic blocks
    pub fn blocks(&self) -> &BasicBlockCollection {
        &self.blocks
    }

    /// Get the procedures and their call graph
    pub fn procedures(&self) -> &ProcedureCollection {
        &self.procedures
    }

    /// Get the block-level control flow graph
    pub fn control_flow_graph(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    /// Get the jump-table slots consumed as data
    pub fn data_items(&self) -> &[DataItem] {
        &self.data_items
    }

    /// Get the findings made so far
    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    /// Number of instructions decoded
    pub fn instruction_count(&self) -> usize {
        self.instructions
    }

    /// Snapshot of everything found so far.
    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            blocks: self.blocks.iter().copied().collect(),
            procedures: self.procedures.iter().cloned().collect(),
            xrefs: self.xrefs.iter().copied().collect(),
            control_flow: self.cfg.edges().copied().collect(),
            data_items: self.data_items.clone(),
            diagnostics: self.errors.iter().cloned().collect(),
        }
    }
}
