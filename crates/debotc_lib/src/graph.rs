//! Control/data-flow graph for a single event body.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; id 0 is the null
//! sentinel. Every node has a fixed number of output slots (slot 0 is the
//! fall-through edge) and a mirrored multiset of input references. All edge
//! mutations go through the surgery methods here so the mirror stays exact.

use crate::DecompileError;

/// Index of a node in a [`Graph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// The null sentinel: an unconnected output slot points here.
pub const NULL: NodeId = NodeId(0);

/// Value stack a return is pushed to (or none for plain statements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    None,
    Normal,
    Str,
}

impl Channel {
    pub fn prefix(self) -> &'static str {
        match self {
            Channel::None => "",
            Channel::Normal => "stack = ",
            Channel::Str => "stringStack = ",
        }
    }

    pub fn is_stack(self) -> bool {
        !matches!(self, Channel::None)
    }
}

/// Argument of a stack-changing node: either recovered literal text or a
/// reference into one of the two value stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Literal(String),
    Stack { channel: Channel, depth: usize },
}

impl Arg {
    pub fn is_literal(&self) -> bool {
        matches!(self, Arg::Literal(_))
    }

    pub fn render(&self) -> String {
        match self {
            Arg::Literal(text) => text.clone(),
            Arg::Stack { channel, depth } => match channel {
                Channel::Str => format!("stringStack[{depth}]"),
                _ => format!("stack[{depth}]"),
            },
        }
    }
}

/// Arguments popped from the int stack: depths `n-1 .. 0`, so the first
/// declared parameter (pushed earliest) comes first.
pub fn consumes_normal_stack(n: usize) -> Vec<Arg> {
    (0..n)
        .rev()
        .map(|depth| Arg::Stack {
            channel: Channel::Normal,
            depth,
        })
        .collect()
}

pub fn string_stack_arg(depth: usize) -> Arg {
    Arg::Stack {
        channel: Channel::Str,
        depth,
    }
}

/// Piece of a concatenation render rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Lit(String),
    Arg(usize),
}

/// How a return value (or statement) of a stack op renders as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderRule {
    /// `name(arg0, arg1, ...)` over all arguments.
    Call(String),
    /// `(arg0 op arg1)`
    Infix(&'static str),
    /// `(oparg0)`
    Prefix(&'static str),
    /// Literal pieces interleaved with argument references.
    Concat(Vec<Piece>),
    /// Fixed text, arguments ignored.
    Fixed(String),
    /// The argument at the given index, verbatim.
    ArgRef(usize),
}

impl RenderRule {
    pub fn render(&self, args: &[Arg]) -> String {
        match self {
            RenderRule::Call(name) => {
                let rendered: Vec<String> = args.iter().map(Arg::render).collect();
                format!("{}({})", name, rendered.join(", "))
            }
            RenderRule::Infix(op) => {
                format!("({} {} {})", args[0].render(), op, args[1].render())
            }
            RenderRule::Prefix(op) => format!("({}{})", op, args[0].render()),
            RenderRule::Concat(pieces) => {
                let mut out = String::new();
                for piece in pieces {
                    match piece {
                        Piece::Lit(text) => out.push_str(text),
                        Piece::Arg(i) => out.push_str(&args[*i].render()),
                    }
                }
                out
            }
            RenderRule::Fixed(text) => text.clone(),
            RenderRule::ArgRef(i) => args[*i].render(),
        }
    }
}

/// Return prototype of a stack op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpReturn {
    pub channel: Channel,
    pub rule: RenderRule,
    pub consumed: bool,
}

impl OpReturn {
    pub fn new(channel: Channel, rule: RenderRule) -> OpReturn {
        OpReturn {
            channel,
            rule,
            consumed: false,
        }
    }
}

/// Recovered value held by a literal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LitReturn {
    pub text: String,
    pub channel: Channel,
    pub consumed: bool,
}

impl LitReturn {
    pub fn new(text: impl Into<String>, channel: Channel) -> LitReturn {
        LitReturn {
            text: text.into(),
            channel,
            consumed: false,
        }
    }
}

/// Effect tracking for stack ops. `innate` is set at construction for
/// builtin calls; `inherited` is set when the node swallows an effectful
/// producer's value. Either one blocks literalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub innate: bool,
    pub inherited: bool,
}

impl Effects {
    pub fn effectful() -> Effects {
        Effects {
            innate: true,
            inherited: false,
        }
    }

    pub fn tainted(self) -> bool {
        self.innate || self.inherited
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Null,
    Begin,
    End,
    /// Jump target at the given byte offset.
    Label(u32),
    /// Fully rendered block of script text.
    Text(String),
    /// Pre-rendered side-effecting statement (assignments, `$v++;`, ...).
    Statement(String),
    /// Values recovered onto the stacks.
    Literal(Vec<LitReturn>),
    StackOp {
        args: Vec<Arg>,
        returns: Vec<OpReturn>,
        effects: Effects,
    },
    /// Pops one int-stack slot and discards it.
    Drop(Arg),
    Goto {
        target: u32,
    },
    IfGoto {
        cond: Arg,
        target: u32,
    },
    IfNotGoto {
        cond: Arg,
        target: u32,
    },
    /// A case comparison inside an already-open switch block.
    CaseGoto {
        value: String,
        target: u32,
    },
    /// First case of a switch block; owns the selector.
    SwitchAndCase {
        selector: Arg,
        value: String,
        target: u32,
    },
    /// Assembled switch: output 0 is the default fall-through, outputs
    /// `1..` are the grouped case targets.
    FullSwitch {
        selector: Arg,
        cases: Vec<Vec<String>>,
    },
}

impl NodeKind {
    fn out_degree(&self) -> usize {
        match self {
            NodeKind::Null | NodeKind::End => 0,
            NodeKind::Goto { .. }
            | NodeKind::IfGoto { .. }
            | NodeKind::IfNotGoto { .. }
            | NodeKind::CaseGoto { .. }
            | NodeKind::SwitchAndCase { .. } => 2,
            NodeKind::FullSwitch { cases, .. } => cases.len() + 1,
            _ => 1,
        }
    }

    /// Short name for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            NodeKind::Null => "null",
            NodeKind::Begin => "begin",
            NodeKind::End => "end",
            NodeKind::Label(_) => "label",
            NodeKind::Text(_) => "text",
            NodeKind::Statement(_) => "statement",
            NodeKind::Literal(_) => "literal",
            NodeKind::StackOp { .. } => "stack op",
            NodeKind::Drop(_) => "drop",
            NodeKind::Goto { .. } => "goto",
            NodeKind::IfGoto { .. } => "if-goto",
            NodeKind::IfNotGoto { .. } => "if-not-goto",
            NodeKind::CaseGoto { .. } => "case-goto",
            NodeKind::SwitchAndCase { .. } => "switch-case",
            NodeKind::FullSwitch { .. } => "switch",
        }
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    outputs: Vec<NodeId>,
    inputs: Vec<NodeId>,
}

#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            nodes: vec![Node {
                kind: NodeKind::Null,
                outputs: Vec::new(),
                inputs: Vec::new(),
            }],
        }
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let outputs = vec![NULL; kind.out_degree()];
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            outputs,
            inputs: Vec::new(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.node_mut(id).kind
    }

    pub fn outputs(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).outputs
    }

    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).inputs
    }

    /// Fall-through successor (output slot 0), or `NULL` when disconnected.
    pub fn next(&self, id: NodeId) -> NodeId {
        self.node(id).outputs.first().copied().unwrap_or(NULL)
    }

    fn link_input(&mut self, to: NodeId, from: NodeId) {
        if to != NULL {
            self.node_mut(to).inputs.push(from);
        }
    }

    fn unlink_input(&mut self, to: NodeId, from: NodeId) {
        if to == NULL {
            return;
        }
        let inputs = &mut self.node_mut(to).inputs;
        if let Some(pos) = inputs.iter().position(|&n| n == from) {
            inputs.remove(pos);
        } else {
            debug_assert!(false, "edge mirror out of sync");
        }
    }

    /// Points output `slot` of `from` at `to`, unlinking whatever was there.
    pub fn set_output(&mut self, from: NodeId, slot: usize, to: NodeId) {
        let current = self.node(from).outputs[slot];
        if current != NULL {
            self.unlink_input(current, from);
        }
        self.node_mut(from).outputs[slot] = to;
        self.link_input(to, from);
    }

    /// Re-points the first output of `from` that equals `old` at `new`.
    pub fn replace_output(&mut self, from: NodeId, old: NodeId, new: NodeId) {
        let slot = self
            .node(from)
            .outputs
            .iter()
            .position(|&n| n == old)
            .unwrap_or_else(|| panic!("no edge to replace"));
        self.unlink_input(old, from);
        self.node_mut(from).outputs[slot] = new;
        self.link_input(new, from);
    }

    /// Severs the fall-through edge of `from`.
    pub fn destroy_next_edge(&mut self, from: NodeId) {
        let to = self.node(from).outputs[0];
        debug_assert!(to != NULL, "fall-through edge already severed");
        self.node_mut(from).outputs[0] = NULL;
        self.unlink_input(to, from);
    }

    /// Removes `id` from the chain, re-pointing its predecessors at its
    /// fall-through successor.
    pub fn cut_node(&mut self, id: NodeId) {
        let next = self.next(id);
        self.destroy_next_edge(id);
        for prev in self.node(id).inputs.clone() {
            self.replace_output(prev, id, next);
        }
    }

    /// Substitutes `new` for `old` in the chain: `new` takes over `old`'s
    /// fall-through successor and all of `old`'s predecessors.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) {
        let next = self.next(old);
        self.destroy_next_edge(old);
        self.set_output(new, 0, next);
        for prev in self.node(old).inputs.clone() {
            self.replace_output(prev, old, new);
        }
    }

    /// Collapses an unconditional jump into direct edges: predecessors are
    /// re-pointed at the jump target and the jump is fully unlinked.
    pub fn replace_goto_with_edge(&mut self, jump: NodeId) {
        let target = self.node(jump).outputs[1];
        debug_assert!(target != NULL, "goto with unresolved target");
        self.destroy_next_edge(jump);
        for prev in self.node(jump).inputs.clone() {
            self.replace_output(prev, jump, target);
        }
        self.replace_output(jump, target, NULL);
    }

    /// Marks return `index` of a literal or stack op as consumed. Consuming
    /// the same return twice is an internal error.
    pub fn mark_return_consumed(
        &mut self,
        id: NodeId,
        index: usize,
    ) -> Result<(), DecompileError> {
        let consumed = match self.kind_mut(id) {
            NodeKind::Literal(returns) => &mut returns[index].consumed,
            NodeKind::StackOp { returns, .. } => &mut returns[index].consumed,
            other => {
                return Err(DecompileError::Internal(format!(
                    "cannot consume a return of a {} node",
                    other.describe()
                )));
            }
        };
        if *consumed {
            return Err(DecompileError::Internal(format!(
                "return {index} consumed twice"
            )));
        }
        *consumed = true;
        Ok(())
    }

    /// Stack arguments of the node, if it consumes any.
    pub fn consumed_args_mut(&mut self, id: NodeId) -> &mut [Arg] {
        match self.kind_mut(id) {
            NodeKind::StackOp { args, .. } => args,
            NodeKind::Drop(arg) => std::slice::from_mut(arg),
            NodeKind::IfGoto { cond, .. } | NodeKind::IfNotGoto { cond, .. } => {
                std::slice::from_mut(cond)
            }
            NodeKind::SwitchAndCase { selector, .. } | NodeKind::FullSwitch { selector, .. } => {
                std::slice::from_mut(selector)
            }
            _ => &mut [],
        }
    }

    /// Renders the statement text of a node, used once rewriting has
    /// recovered its values.
    pub fn node_text(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Text(text) | NodeKind::Statement(text) => text.clone(),
            NodeKind::Label(offset) => format!("label{offset:X}"),
            NodeKind::Literal(returns) => {
                let lines: Vec<String> = returns
                    .iter()
                    .filter(|r| !r.consumed)
                    .map(|r| format!("{}{}", r.channel.prefix(), r.text))
                    .collect();
                append_semicolon(lines.join("\n"))
            }
            NodeKind::StackOp {
                args,
                returns,
                effects,
            } => {
                let lines: Vec<String> = returns
                    .iter()
                    .filter(|r| !r.consumed)
                    .map(|r| format!("{}{}", r.channel.prefix(), r.rule.render(args)))
                    .collect();
                if lines.is_empty() {
                    // The value was claimed elsewhere but an effectful call
                    // still has to happen in program order.
                    let call = returns
                        .iter()
                        .find(|r| matches!(r.rule, RenderRule::Call(_)))
                        .map(|r| r.rule.render(args));
                    match call {
                        Some(text) if effects.innate => append_semicolon(text),
                        _ => ";".to_string(),
                    }
                } else {
                    append_semicolon(lines.join("\n"))
                }
            }
            NodeKind::Drop(arg) => format!("{} /* result ignored */;", arg.render()),
            NodeKind::Goto { target } => format!("goto label{target:X}"),
            NodeKind::IfGoto { cond, target } => {
                format!("if ({}) goto label{target:X}", cond.render())
            }
            NodeKind::IfNotGoto { cond, target } => {
                format!("if (!({})) goto label{target:X}", cond.render())
            }
            NodeKind::CaseGoto { value, target } => {
                format!("case {value}: goto label{target:X}")
            }
            NodeKind::SwitchAndCase {
                selector,
                value,
                target,
            } => format!(
                "switch ({}) case {value}: goto label{target:X}",
                selector.render()
            ),
            NodeKind::FullSwitch { selector, .. } => {
                format!("switch ({})", selector.render())
            }
            NodeKind::Null | NodeKind::Begin | NodeKind::End => String::new(),
        }
    }

    /// Verifies the output/input mirror over the whole arena.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            for &out in &node.outputs {
                if out == NULL {
                    continue;
                }
                let expected = node.outputs.iter().filter(|&&o| o == out).count();
                let actual = self.node(out).inputs.iter().filter(|&&n| n == id).count();
                if actual != expected {
                    return Err(format!(
                        "node {i} has {expected} edge(s) to node {} but {} mirrored input(s)",
                        out.0, actual
                    ));
                }
            }
            for &inp in &node.inputs {
                if !self.node(inp).outputs.contains(&id) {
                    return Err(format!(
                        "node {i} lists node {} as input but has no such edge",
                        inp.0
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Appends a `;` unless the text already ends with one.
pub fn append_semicolon(text: String) -> String {
    if text.ends_with(';') || text.is_empty() {
        text
    } else {
        format!("{text};")
    }
}

/// Prefixes every line with one tab.
pub fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("\t{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(g: &mut Graph, kinds: Vec<NodeKind>) -> Vec<NodeId> {
        let ids: Vec<NodeId> = kinds.into_iter().map(|k| g.add(k)).collect();
        for pair in ids.windows(2) {
            g.set_output(pair[0], 0, pair[1]);
        }
        ids
    }

    #[test]
    fn edge_mirror_stays_consistent_through_surgery() {
        let mut g = Graph::new();
        let ids = chain(
            &mut g,
            vec![
                NodeKind::Begin,
                NodeKind::Statement("a;".into()),
                NodeKind::Statement("b;".into()),
                NodeKind::End,
            ],
        );
        g.check_consistency().unwrap();

        g.cut_node(ids[1]);
        g.check_consistency().unwrap();
        assert_eq!(g.next(ids[0]), ids[2]);
        assert!(g.inputs(ids[1]).is_empty());

        let replacement = g.add(NodeKind::Text("b".into()));
        g.replace_node(ids[2], replacement);
        g.check_consistency().unwrap();
        assert_eq!(g.next(ids[0]), replacement);
        assert_eq!(g.next(replacement), ids[3]);
    }

    #[test]
    fn goto_collapse_redirects_predecessors() {
        let mut g = Graph::new();
        let begin = g.add(NodeKind::Begin);
        let jump = g.add(NodeKind::Goto { target: 8 });
        let skipped = g.add(NodeKind::Statement("skipped;".into()));
        let label = g.add(NodeKind::Label(8));
        let end = g.add(NodeKind::End);
        g.set_output(begin, 0, jump);
        g.set_output(jump, 0, skipped);
        g.set_output(skipped, 0, label);
        g.set_output(label, 0, end);
        g.set_output(jump, 1, label);

        g.replace_goto_with_edge(jump);
        g.check_consistency().unwrap();
        assert_eq!(g.next(begin), label);
        assert!(g.inputs(jump).is_empty());
        assert_eq!(g.outputs(jump), &[NULL, NULL]);
    }

    #[test]
    fn double_consumption_is_an_error() {
        let mut g = Graph::new();
        let lit = g.add(NodeKind::Literal(vec![LitReturn::new("5", Channel::Normal)]));
        g.mark_return_consumed(lit, 0).unwrap();
        let err = g.mark_return_consumed(lit, 0).unwrap_err();
        assert!(matches!(err, DecompileError::Internal(_)));
    }

    #[test]
    fn unconsumed_returns_render_with_channel_prefixes() {
        let mut g = Graph::new();
        let lit = g.add(NodeKind::Literal(vec![
            LitReturn::new("5", Channel::Normal),
            LitReturn::new("\"hi\"", Channel::Str),
        ]));
        assert_eq!(g.node_text(lit), "stack = 5\nstringStack = \"hi\";");

        let call = g.add(NodeKind::StackOp {
            args: vec![Arg::Literal("5".into()), Arg::Literal("7".into())],
            returns: vec![OpReturn::new(
                Channel::Normal,
                RenderRule::Call("Random".into()),
            )],
            effects: Effects::effectful(),
        });
        assert_eq!(g.node_text(call), "stack = Random(5, 7);");
        g.mark_return_consumed(call, 0).unwrap();
        assert_eq!(g.node_text(call), "Random(5, 7);");
    }

    #[test]
    fn operator_rendering() {
        let args = vec![
            Arg::Stack {
                channel: Channel::Normal,
                depth: 1,
            },
            Arg::Stack {
                channel: Channel::Normal,
                depth: 0,
            },
        ];
        assert_eq!(
            RenderRule::Infix("+").render(&args),
            "(stack[1] + stack[0])"
        );
        assert_eq!(RenderRule::Prefix("!").render(&args), "(!stack[1])");
    }
}
