//! Per-method control-flow graphs.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::instruction::Instruction;
use super::position::PositionHandle;

pub type BlockId = u32;

/// Unique id of an instruction within its method, assigned block-major
/// at construction. Keys instruction memory locations and call sites.
pub type InstructionId = u32;

/// An instruction with its id and optional source position.
#[derive(Debug, Clone)]
pub struct InstructionEntry {
    pub id: InstructionId,
    pub instruction: Instruction,
    pub position: Option<PositionHandle>,
}

/// A basic block: straight-line instructions plus successor edges.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<InstructionEntry>,
    pub successors: SmallVec<[BlockId; 2]>,
    pub predecessors: SmallVec<[BlockId; 2]>,
}

/// The control-flow graph of one method body.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    entry: BlockId,
}

impl ControlFlowGraph {
    pub fn builder() -> CfgBuilder {
        CfgBuilder::default()
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id as usize]
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.instructions.len()).sum()
    }

    /// Blocks in reverse post order from the entry; the iteration order
    /// of the forward fixpoint.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = FxHashSet::default();
        let mut post_order = Vec::with_capacity(self.blocks.len());
        // Iterative DFS with an explicit successor cursor.
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry);
        while let Some((block, cursor)) = stack.pop() {
            let successors = &self.block(block).successors;
            if cursor < successors.len() {
                stack.push((block, cursor + 1));
                let next = successors[cursor];
                if visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                post_order.push(block);
            }
        }
        post_order.reverse();
        post_order
    }
}

/// Builder assigning instruction ids block-major.
#[derive(Debug, Default)]
pub struct CfgBuilder {
    blocks: Vec<BasicBlock>,
    next_instruction: InstructionId,
}

impl CfgBuilder {
    /// Append a block of instructions; returns its id.
    pub fn block(
        &mut self,
        instructions: Vec<(Instruction, Option<PositionHandle>)>,
    ) -> BlockId {
        let id = self.blocks.len() as BlockId;
        let entries = instructions
            .into_iter()
            .map(|(instruction, position)| {
                let entry = InstructionEntry {
                    id: self.next_instruction,
                    instruction,
                    position,
                };
                self.next_instruction += 1;
                entry
            })
            .collect();
        self.blocks.push(BasicBlock {
            id,
            instructions: entries,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        });
        id
    }

    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from as usize].successors.push(to);
    }

    /// Finish the graph; block 0 is the entry.
    pub fn build(mut self) -> ControlFlowGraph {
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .iter()
            .flat_map(|block| {
                block
                    .successors
                    .iter()
                    .map(move |&successor| (block.id, successor))
            })
            .collect();
        for (from, to) in edges {
            self.blocks[to as usize].predecessors.push(from);
        }
        ControlFlowGraph {
            blocks: self.blocks,
            entry: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_post_order_visits_preds_first_in_a_diamond() {
        let mut builder = ControlFlowGraph::builder();
        let a = builder.block(vec![]);
        let b = builder.block(vec![]);
        let c = builder.block(vec![]);
        let d = builder.block(vec![]);
        builder.edge(a, b);
        builder.edge(a, c);
        builder.edge(b, d);
        builder.edge(c, d);
        let cfg = builder.build();

        let order = cfg.reverse_post_order();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], a);
        assert_eq!(order[3], d);
    }

    #[test]
    fn reverse_post_order_handles_loops() {
        let mut builder = ControlFlowGraph::builder();
        let a = builder.block(vec![]);
        let b = builder.block(vec![]);
        builder.edge(a, b);
        builder.edge(b, a);
        let cfg = builder.build();
        assert_eq!(cfg.reverse_post_order(), vec![a, b]);
    }
}
