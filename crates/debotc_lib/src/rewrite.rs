//! Graph rewriting: recovers pushed values into expressions, assembles
//! switch blocks, and packs the graph down to structured script text.
//!
//! Both phases run a rule set to a fixed point over an iterative preorder
//! DFS. Rules inspect a node's successors and perform their surgery through
//! the [`Graph`] edge methods, so the output/input mirror stays intact;
//! under `debug_assertions` the mirror is re-verified after every sweep.

use std::collections::HashSet;

use crate::DecompileError;
use crate::graph::{Arg, Channel, Graph, LitReturn, NodeId, NodeKind, NULL, indent};

const MAX_SWEEPS: usize = 100;

type Rule = fn(&mut Graph, NodeId) -> Result<bool, DecompileError>;

/// Runs both rewrite phases over an event graph.
pub(crate) fn compact(g: &mut Graph, begin: NodeId) -> Result<(), DecompileError> {
    optimize_while(g, begin, recover_values)?;
    optimize_while(g, begin, pack_to_text)?;
    Ok(())
}

/// Renders a fully compacted graph: `Begin -> End` is an empty body,
/// `Begin -> Text -> End` is the body indented to event depth. Anything
/// else means packing got stuck, which is reported with the leftover chain.
pub(crate) fn stringify(g: &Graph, begin: NodeId) -> Result<String, DecompileError> {
    let first = g.next(begin);
    if matches!(g.kind(first), NodeKind::End) {
        return Ok(String::new());
    }
    if let NodeKind::Text(text) = g.kind(first) {
        if matches!(g.kind(g.next(first)), NodeKind::End) {
            return Ok(indent(&indent(text)));
        }
    }
    let mut shapes = Vec::new();
    let mut cursor = begin;
    for _ in 0..12 {
        shapes.push(g.kind(cursor).describe());
        cursor = g.next(cursor);
        if cursor == NULL {
            break;
        }
        if matches!(g.kind(cursor), NodeKind::End) {
            shapes.push("end");
            break;
        }
    }
    Err(DecompileError::Internal(format!(
        "event body did not pack to a single text block: {}",
        shapes.join(" -> ")
    )))
}

fn optimize_while(g: &mut Graph, begin: NodeId, rule: Rule) -> Result<(), DecompileError> {
    for _ in 0..MAX_SWEEPS {
        let changed = sweep(g, begin, rule)?;
        #[cfg(debug_assertions)]
        g.check_consistency().map_err(DecompileError::Internal)?;
        if !changed {
            return Ok(());
        }
    }
    debug_assert!(false, "rewrite did not converge within {MAX_SWEEPS} sweeps");
    Ok(())
}

fn sweep(g: &mut Graph, begin: NodeId, rule: Rule) -> Result<bool, DecompileError> {
    let mut changed = false;
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![begin];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        changed |= rule(g, node)?;
        let outs: Vec<NodeId> = g.outputs(node).to_vec();
        for &out in outs.iter().rev() {
            if out != NULL && !visited.contains(&out) {
                stack.push(out);
            }
        }
    }
    Ok(changed)
}

/// Phase 1: value recovery and switch assembly.
fn recover_values(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    changed |= literalize_next(g, n)?;
    changed |= join_next_literals(g, n)?;
    changed |= inline_stack_args(g, n)?;
    changed |= cleanup_literals(g, n)?;
    changed |= assemble_switch(g, n)?;
    changed |= prune_unused_labels(g, n)?;
    Ok(changed)
}

/// Phase 2: packing down to structured text.
fn pack_to_text(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    changed |= pack_pairs(g, n)?;
    changed |= convert_single(g, n)?;
    changed |= prune_unused_labels(g, n)?;
    changed |= cleanup_literals(g, n)?;
    changed |= pack_if(g, n)?;
    changed |= pack_switch(g, n)?;
    Ok(changed)
}

/// A successor that is side-effect-free with all-literal arguments and at
/// least one unconsumed stack return becomes a literal node.
fn literalize_next(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL || g.outputs(out).len() != 1 {
            continue;
        }
        let NodeKind::StackOp {
            args,
            returns,
            effects,
        } = g.kind(out)
        else {
            continue;
        };
        if effects.tainted()
            || !args.iter().all(Arg::is_literal)
            || !returns.iter().any(|r| !r.consumed && r.channel.is_stack())
        {
            continue;
        }
        let lit: Vec<LitReturn> = returns
            .iter()
            .map(|r| LitReturn {
                text: r.rule.render(args),
                channel: r.channel,
                consumed: r.consumed,
            })
            .collect();
        let new = g.add(NodeKind::Literal(lit));
        g.replace_node(out, new);
        changed = true;
    }
    Ok(changed)
}

/// Adjacent literals merge, keeping push order (earlier values deeper).
fn join_next_literals(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL
            || !matches!(g.kind(out), NodeKind::Literal(_))
            || g.outputs(out).len() != 1
            || g.inputs(out).len() != 1
        {
            continue;
        }
        let next = g.next(out);
        if next == NULL || !matches!(g.kind(next), NodeKind::Literal(_)) {
            continue;
        }
        let mut merged = match g.kind(out) {
            NodeKind::Literal(returns) => returns.clone(),
            _ => unreachable!(),
        };
        if let NodeKind::Literal(returns) = g.kind(next) {
            merged.extend(returns.iter().cloned());
        }
        let new = g.add(NodeKind::Literal(merged));
        g.replace_node(next, new);
        g.cut_node(out);
        changed = true;
    }
    Ok(changed)
}

/// Substitutes a producer's values into its sole consumer's stack
/// arguments. Producers are literal nodes, or effectful calls with exactly
/// one stack return and all-literal arguments feeding a side-effect-free
/// consumer. Claims are tracked per channel; deeper references shift down
/// by the number of claimed slots on their channel.
fn inline_stack_args(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    if g.outputs(n).len() != 1 {
        return Ok(false);
    }
    let consumer = g.next(n);
    if consumer == NULL || g.inputs(consumer).len() != 1 {
        return Ok(false);
    }

    // (return index, rendered value) per channel, top of stack first
    let mut avail_normal: Vec<(usize, String)> = Vec::new();
    let mut avail_str: Vec<(usize, String)> = Vec::new();
    let effectful_producer = match g.kind(n) {
        NodeKind::Literal(returns) => {
            for (i, r) in returns.iter().enumerate() {
                if r.consumed {
                    continue;
                }
                match r.channel {
                    Channel::Normal => avail_normal.push((i, r.text.clone())),
                    Channel::Str => avail_str.push((i, r.text.clone())),
                    Channel::None => {}
                }
            }
            avail_normal.reverse();
            avail_str.reverse();
            false
        }
        NodeKind::StackOp {
            args,
            returns,
            effects,
        } if effects.innate => {
            if !args.iter().all(Arg::is_literal) {
                return Ok(false);
            }
            let mut stack_returns = returns
                .iter()
                .enumerate()
                .filter(|(_, r)| r.channel.is_stack());
            let Some((i, ret)) = stack_returns.next() else {
                return Ok(false);
            };
            if stack_returns.next().is_some() || ret.consumed {
                return Ok(false);
            }
            let value = (i, ret.rule.render(args));
            match ret.channel {
                Channel::Str => avail_str.push(value),
                _ => avail_normal.push(value),
            }
            true
        }
        _ => return Ok(false),
    };
    if avail_normal.is_empty() && avail_str.is_empty() {
        return Ok(false);
    }
    if effectful_producer {
        let safe = match g.kind(consumer) {
            NodeKind::StackOp { effects, .. } => !effects.tainted(),
            _ => true,
        };
        if !safe {
            return Ok(false);
        }
    }

    let arg_specs: Vec<(usize, Channel, usize)> = g
        .consumed_args_mut(consumer)
        .iter()
        .enumerate()
        .filter_map(|(i, arg)| match arg {
            Arg::Stack { channel, depth } => Some((i, *channel, *depth)),
            Arg::Literal(_) => None,
        })
        .collect();
    if arg_specs.is_empty() {
        return Ok(false);
    }

    let mut replacements: Vec<(usize, String)> = Vec::new();
    let mut adjustments: Vec<(usize, usize)> = Vec::new();
    let mut consumed: Vec<usize> = Vec::new();
    for (channel, avail) in [(Channel::Normal, &avail_normal), (Channel::Str, &avail_str)] {
        let mut per_channel: Vec<(usize, usize)> = arg_specs
            .iter()
            .filter(|&&(_, c, _)| c == channel)
            .map(|&(i, _, d)| (i, d))
            .collect();
        per_channel.sort_by_key(|&(_, depth)| depth);
        let mut claimed = 0usize;
        for (arg_index, depth) in per_channel {
            if depth < avail.len() {
                let (ret_index, ref value) = avail[depth];
                replacements.push((arg_index, value.clone()));
                consumed.push(ret_index);
                claimed += 1;
            } else if claimed > 0 {
                adjustments.push((arg_index, depth - claimed));
            }
        }
    }
    if replacements.is_empty() {
        return Ok(false);
    }

    let args = g.consumed_args_mut(consumer);
    for (i, value) in replacements {
        args[i] = Arg::Literal(value);
    }
    for (i, new_depth) in adjustments {
        if let Arg::Stack { depth, .. } = &mut args[i] {
            *depth = new_depth;
        }
    }
    for index in consumed {
        g.mark_return_consumed(n, index)?;
    }
    if effectful_producer {
        if let NodeKind::StackOp { effects, .. } = g.kind_mut(consumer) {
            effects.inherited = true;
        }
    }
    literalize_next(g, n)?;
    Ok(true)
}

/// Drops consumed values: partially consumed literals shrink, fully
/// consumed literals and effect-free stack ops disappear. Fully consumed
/// effectful calls stay so the call itself remains in program order.
fn cleanup_literals(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL {
            continue;
        }
        match g.kind(out) {
            NodeKind::Literal(returns) if returns.iter().any(|r| r.consumed) => {
                let remaining: Vec<LitReturn> = returns
                    .iter()
                    .filter(|r| !r.consumed)
                    .cloned()
                    .collect();
                if remaining.is_empty() {
                    g.cut_node(out);
                } else {
                    let new = g.add(NodeKind::Literal(remaining));
                    g.replace_node(out, new);
                }
                changed = true;
            }
            NodeKind::StackOp {
                returns, effects, ..
            } if !effects.innate && !returns.is_empty() && returns.iter().all(|r| r.consumed) => {
                g.cut_node(out);
                changed = true;
            }
            _ => {}
        }
    }
    Ok(changed)
}

/// Assembles a `SwitchAndCase` + `CaseGoto` chain, terminated by a stack
/// drop, into a single `FullSwitch` with cases grouped by jump target.
fn assemble_switch(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL {
            continue;
        }
        let NodeKind::SwitchAndCase {
            selector, value, ..
        } = g.kind(out)
        else {
            continue;
        };
        let selector = selector.clone();
        let mut entries: Vec<(String, NodeId)> = vec![(value.clone(), g.outputs(out)[1])];
        let mut chain: Vec<NodeId> = vec![out];
        let mut cursor = g.next(out);
        let drop_node = loop {
            match g.kind(cursor) {
                NodeKind::CaseGoto { value, .. } => {
                    if g.inputs(cursor).len() != 1 {
                        return Err(DecompileError::Internal(
                            "switch case chain node has multiple predecessors".to_string(),
                        ));
                    }
                    entries.push((value.clone(), g.outputs(cursor)[1]));
                    chain.push(cursor);
                    cursor = g.next(cursor);
                }
                NodeKind::Drop(_) => break cursor,
                _ => return Err(DecompileError::MalformedSwitch),
            }
        };

        // group case values by jump target, first-seen order
        let mut groups: Vec<(NodeId, Vec<String>)> = Vec::new();
        for (value, target) in entries {
            match groups.iter_mut().find(|(t, _)| *t == target) {
                Some((_, values)) => values.push(value),
                None => groups.push((target, vec![value])),
            }
        }

        let default_target = g.next(drop_node);
        let full = g.add(NodeKind::FullSwitch {
            selector,
            cases: groups.iter().map(|(_, values)| values.clone()).collect(),
        });
        g.set_output(full, 0, default_target);
        for (slot, &(target, _)) in groups.iter().enumerate() {
            g.set_output(full, slot + 1, target);
        }
        for &case in &chain {
            let target = g.outputs(case)[1];
            g.replace_output(case, target, NULL);
        }
        g.destroy_next_edge(drop_node);
        for prev in g.inputs(out).to_vec() {
            g.replace_output(prev, out, full);
        }
        changed = true;
    }
    Ok(changed)
}

/// Labels with a single remaining predecessor carry no information.
fn prune_unused_labels(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out != NULL && matches!(g.kind(out), NodeKind::Label(_)) && g.inputs(out).len() == 1 {
            g.cut_node(out);
            changed = true;
        }
    }
    Ok(changed)
}

/// Whether a node can be rendered as a standalone statement line.
fn renderable(g: &Graph, id: NodeId) -> bool {
    match g.kind(id) {
        NodeKind::Text(_) | NodeKind::Statement(_) | NodeKind::Drop(_) | NodeKind::StackOp { .. } => {
            true
        }
        NodeKind::Literal(returns) => returns.iter().any(|r| !r.consumed),
        _ => false,
    }
}

fn is_text(g: &Graph, id: NodeId) -> bool {
    matches!(g.kind(id), NodeKind::Text(_))
}

/// Branch join candidates: a label or the event end.
fn can_be_end(g: &Graph, id: NodeId) -> bool {
    matches!(g.kind(id), NodeKind::Label(_) | NodeKind::End)
}

/// Merges two adjacent renderable statements into one text block.
fn pack_pairs(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL
            || g.outputs(out).len() != 1
            || matches!(g.kind(out), NodeKind::Label(_))
            || !renderable(g, out)
        {
            continue;
        }
        let after = g.next(out);
        if after == NULL
            || after == out
            || matches!(g.kind(after), NodeKind::Label(_))
            || g.inputs(after).len() != 1
            || g.outputs(after).len() != 1
            || !renderable(g, after)
        {
            continue;
        }
        let text = format!("{}\n{}", g.node_text(out), g.node_text(after));
        let new = g.add(NodeKind::Text(text));
        g.set_output(new, 0, g.next(after));
        for prev in g.inputs(out).to_vec() {
            g.replace_output(prev, out, new);
        }
        g.destroy_next_edge(after);
        changed = true;
    }
    Ok(changed)
}

/// Turns a lone renderable statement into a text node.
fn convert_single(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL
            || g.outputs(out).len() != 1
            || matches!(g.kind(out), NodeKind::Label(_) | NodeKind::Text(_))
            || !renderable(g, out)
        {
            continue;
        }
        let new = g.add(NodeKind::Text(g.node_text(out)));
        g.replace_node(out, new);
        changed = true;
    }
    Ok(changed)
}

/// Wraps a condition in `!(...)`, or unwraps an existing one.
fn invert_condition(cond: &str) -> String {
    if let Some(inner) = cond.strip_prefix("!(").and_then(|s| s.strip_suffix(')')) {
        inner.to_string()
    } else {
        format!("!({cond})")
    }
}

/// Packs the three if/else join shapes into a text block. The condition of
/// the jump-if-true form is negated so the textual then-branch is always
/// the fall-through path.
fn pack_if(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL {
            continue;
        }
        // The then-branch is the fall-through path; the jump-if-true form
        // negates its condition so that stays textually true.
        let (mut main, mut else_branch, mut cond) = match g.kind(out) {
            NodeKind::IfNotGoto { cond, .. } => {
                (g.next(out), g.outputs(out)[1], cond.render())
            }
            NodeKind::IfGoto { cond, .. } => (
                g.next(out),
                g.outputs(out)[1],
                invert_condition(&cond.render()),
            ),
            _ => continue,
        };
        if main == NULL || else_branch == NULL || main == else_branch {
            continue;
        }
        let ending;
        if is_text(g, main) && can_be_end(g, else_branch) && g.next(main) == else_branch {
            ending = else_branch;
        } else if can_be_end(g, main) && is_text(g, else_branch) && g.next(else_branch) == main {
            ending = main;
            main = else_branch;
            else_branch = ending;
            cond = invert_condition(&cond);
        } else if is_text(g, main)
            && is_text(g, else_branch)
            && g.next(main) != NULL
            && g.next(main) == g.next(else_branch)
            && can_be_end(g, g.next(main))
        {
            ending = g.next(main);
        } else {
            continue;
        }

        let mut text = format!("if ({cond}) {{\n{}\n}}", indent(&g.node_text(main)));
        if else_branch != ending {
            text.push_str(&format!(
                " else {{\n{}\n}}",
                indent(&g.node_text(else_branch))
            ));
        }
        let new = g.add(NodeKind::Text(text));
        g.set_output(new, 0, ending);
        for prev in g.inputs(out).to_vec() {
            g.replace_output(prev, out, new);
        }
        if g.inputs(ending).contains(&out) {
            g.replace_output(out, ending, NULL);
        }
        if g.inputs(ending).contains(&main) {
            g.destroy_next_edge(main);
        }
        if else_branch != ending && g.inputs(ending).contains(&else_branch) {
            g.destroy_next_edge(else_branch);
        }
        changed = true;
    }
    Ok(changed)
}

/// Packs an assembled switch whose branches are all text (or the join)
/// into one text block. Case values sharing a target render as a single
/// `case A, B:` clause; a `default:` arm appears only when the fall-through
/// differs from the join.
fn pack_switch(g: &mut Graph, n: NodeId) -> Result<bool, DecompileError> {
    let mut changed = false;
    for &out in &g.outputs(n).to_vec() {
        if out == NULL {
            continue;
        }
        let NodeKind::FullSwitch { selector, cases } = g.kind(out) else {
            continue;
        };
        let selector = selector.clone();
        let cases = cases.clone();
        let branches = g.outputs(out).to_vec();
        if branches.iter().any(|&b| b == NULL) {
            continue;
        }
        let mut ending = None;
        let mut packable = true;
        for &branch in &branches {
            let candidate = if can_be_end(g, branch) {
                branch
            } else if is_text(g, branch) && g.next(branch) != NULL && can_be_end(g, g.next(branch))
            {
                g.next(branch)
            } else {
                packable = false;
                break;
            };
            match ending {
                None => ending = Some(candidate),
                Some(e) if e == candidate => {}
                Some(_) => {
                    packable = false;
                    break;
                }
            }
        }
        let Some(ending) = ending.filter(|_| packable) else {
            continue;
        };

        let mut sections = Vec::new();
        for (i, values) in cases.iter().enumerate() {
            let target = branches[i + 1];
            let header = format!("case {}:", values.join(", "));
            if target == ending {
                sections.push(format!("{header}\n\tbreak;"));
            } else {
                sections.push(format!(
                    "{header}\n{}\n\tbreak;",
                    indent(&g.node_text(target))
                ));
            }
        }
        if branches[0] != ending {
            sections.push(format!("default:\n{}", indent(&g.node_text(branches[0]))));
        }
        let text = format!(
            "switch ({}) {{\n{}\n}}",
            selector.render(),
            sections.join("\n")
        );

        let new = g.add(NodeKind::Text(text));
        g.set_output(new, 0, ending);
        for prev in g.inputs(out).to_vec() {
            g.replace_output(prev, out, new);
        }
        for &branch in &branches {
            if branch != ending && g.inputs(ending).contains(&branch) {
                g.destroy_next_edge(branch);
            }
        }
        while g.inputs(ending).contains(&out) {
            g.replace_output(out, ending, NULL);
        }
        changed = true;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Effects, OpReturn, RenderRule, consumes_normal_stack};

    fn begin_end(g: &mut Graph) -> (NodeId, NodeId) {
        (g.add(NodeKind::Begin), g.add(NodeKind::End))
    }

    fn link_chain(g: &mut Graph, ids: &[NodeId]) {
        for pair in ids.windows(2) {
            g.set_output(pair[0], 0, pair[1]);
        }
    }

    fn literal(g: &mut Graph, values: &[&str]) -> NodeId {
        g.add(NodeKind::Literal(
            values
                .iter()
                .map(|v| LitReturn::new(*v, Channel::Normal))
                .collect(),
        ))
    }

    fn call(g: &mut Graph, name: &str, num_args: usize, channel: Channel) -> NodeId {
        g.add(NodeKind::StackOp {
            args: consumes_normal_stack(num_args),
            returns: vec![OpReturn::new(channel, RenderRule::Call(name.to_string()))],
            effects: Effects::effectful(),
        })
    }

    fn compacted(g: &mut Graph, begin: NodeId) -> String {
        compact(g, begin).unwrap();
        g.check_consistency().unwrap();
        stringify(g, begin).unwrap()
    }

    #[test]
    fn literal_arguments_fold_into_the_call() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let lit = literal(&mut g, &["local1", "1"]);
        let func = call(&mut g, "Function", 2, Channel::Normal);
        link_chain(&mut g, &[begin, lit, func, end]);

        let body = compacted(&mut g, begin);
        assert_eq!(body, "\t\tstack = Function(local1, 1);");
    }

    #[test]
    fn deeper_references_shift_after_partial_claims() {
        // One pushed value, but the consumer reaches two slots deep: the
        // shallow argument is claimed, the deep one shifts down by one.
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let lit = literal(&mut g, &["1"]);
        let func = call(&mut g, "Function", 2, Channel::Normal);
        link_chain(&mut g, &[begin, lit, func, end]);

        let body = compacted(&mut g, begin);
        assert_eq!(body, "\t\tstack = Function(stack[0], 1);");
    }

    #[test]
    fn statements_pack_into_one_text_block() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let a = g.add(NodeKind::Statement("$global0 = 1;".to_string()));
        let b = g.add(NodeKind::Statement("$global1 = 2;".to_string()));
        let c = g.add(NodeKind::Statement("$global2 = 3;".to_string()));
        link_chain(&mut g, &[begin, a, b, c, end]);

        let body = compacted(&mut g, begin);
        assert_eq!(body, "\t\t$global0 = 1;\n\t\t$global1 = 2;\n\t\t$global2 = 3;");
    }

    #[test]
    fn compact_reaches_a_fixed_point() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let lit = literal(&mut g, &["5", "7"]);
        let func = call(&mut g, "Random", 2, Channel::Normal);
        link_chain(&mut g, &[begin, lit, func, end]);

        compact(&mut g, begin).unwrap();
        assert!(!sweep(&mut g, begin, recover_values).unwrap());
        assert!(!sweep(&mut g, begin, pack_to_text).unwrap());
    }

    #[test]
    fn unused_labels_are_pruned() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let text = g.add(NodeKind::Text("a;".to_string()));
        let label = g.add(NodeKind::Label(16));
        link_chain(&mut g, &[begin, text, label, end]);

        assert!(sweep(&mut g, begin, prune_unused_labels).unwrap());
        g.check_consistency().unwrap();
        assert_eq!(g.next(text), end);
        assert!(g.inputs(label).is_empty());
    }

    #[test]
    fn if_else_fallthrough_packs_with_the_join_kept() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let branch = g.add(NodeKind::Text("Branch1".to_string()));
        let join = g.add(NodeKind::Label(0x20));
        let cond = g.add(NodeKind::IfNotGoto {
            cond: Arg::Literal("cond".to_string()),
            target: 0x20,
        });
        link_chain(&mut g, &[begin, cond, branch, join, end]);
        g.set_output(cond, 1, join);

        assert!(sweep(&mut g, begin, pack_if).unwrap());
        g.check_consistency().unwrap();

        let packed = g.next(begin);
        assert_eq!(
            g.kind(packed),
            &NodeKind::Text("if (cond) {\n\tBranch1\n}".to_string())
        );
        assert_eq!(g.next(packed), join);
        assert_eq!(g.next(join), end);
    }

    #[test]
    fn if_with_both_branches_packs_an_else_arm() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let then_branch = g.add(NodeKind::Text("Then;".to_string()));
        let else_branch = g.add(NodeKind::Text("Else;".to_string()));
        let join = g.add(NodeKind::Label(0x30));
        let cond = g.add(NodeKind::IfNotGoto {
            cond: Arg::Literal("cond".to_string()),
            target: 0x30,
        });
        link_chain(&mut g, &[begin, cond, then_branch, join, end]);
        g.set_output(cond, 1, else_branch);
        g.set_output(else_branch, 0, join);

        assert!(sweep(&mut g, begin, pack_if).unwrap());
        g.check_consistency().unwrap();
        assert_eq!(
            g.kind(g.next(begin)),
            &NodeKind::Text(
                "if (cond) {\n\tThen;\n} else {\n\tElse;\n}".to_string()
            )
        );
    }

    #[test]
    fn jump_if_true_negates_the_condition() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let fallthrough = g.add(NodeKind::Text("Fall;".to_string()));
        let cond = g.add(NodeKind::IfGoto {
            cond: Arg::Literal("(a > b)".to_string()),
            target: 0x40,
        });
        let join = g.add(NodeKind::Label(0x40));
        link_chain(&mut g, &[begin, cond, fallthrough, join, end]);
        g.set_output(cond, 1, join);

        assert!(sweep(&mut g, begin, pack_if).unwrap());
        assert_eq!(
            g.kind(g.next(begin)),
            &NodeKind::Text("if (!((a > b))) {\n\tFall;\n}".to_string())
        );
    }

    #[test]
    fn invert_condition_strips_an_existing_wrapper() {
        assert_eq!(invert_condition("(a > b)"), "!((a > b))");
        assert_eq!(invert_condition("!((a > b))"), "(a > b)");
    }

    #[test]
    fn switch_chain_assembles_and_groups_by_target() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let branch1 = g.add(NodeKind::Text("Branch1;".to_string()));
        let branch2 = g.add(NodeKind::Text("Branch2;".to_string()));
        let join = g.add(NodeKind::Label(0x50));
        let sw = g.add(NodeKind::SwitchAndCase {
            selector: Arg::Literal("local1".to_string()),
            value: "1".to_string(),
            target: 0,
        });
        let case2 = g.add(NodeKind::CaseGoto {
            value: "2".to_string(),
            target: 0,
        });
        let case3 = g.add(NodeKind::CaseGoto {
            value: "3".to_string(),
            target: 0,
        });
        let drop = g.add(NodeKind::Drop(Arg::Stack {
            channel: Channel::Normal,
            depth: 0,
        }));
        link_chain(&mut g, &[begin, sw, case2, case3, drop, join, end]);
        g.set_output(sw, 1, branch1);
        g.set_output(case2, 1, branch1);
        g.set_output(case3, 1, branch2);
        g.set_output(branch1, 0, join);
        g.set_output(branch2, 0, join);

        let body = compacted(&mut g, begin);
        assert_eq!(
            body,
            "\t\tswitch (local1) {\n\t\tcase 1, 2:\n\t\t\tBranch1;\n\t\t\tbreak;\n\t\tcase 3:\n\t\t\tBranch2;\n\t\t\tbreak;\n\t\t}"
        );
    }

    #[test]
    fn switch_without_drop_terminator_is_malformed() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let branch = g.add(NodeKind::Text("Branch;".to_string()));
        let sw = g.add(NodeKind::SwitchAndCase {
            selector: Arg::Literal("local1".to_string()),
            value: "1".to_string(),
            target: 0,
        });
        link_chain(&mut g, &[begin, sw, end]);
        g.set_output(sw, 1, branch);

        let err = compact(&mut g, begin).unwrap_err();
        assert!(matches!(err, DecompileError::MalformedSwitch));
    }

    #[test]
    fn consumed_effectful_producer_still_emits_its_call() {
        // The drop claims Roam's value, but the call has side effects and
        // must stay in the output as its own statement.
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let roam = call(&mut g, "Roam", 0, Channel::Normal);
        let drop = g.add(NodeKind::Drop(Arg::Stack {
            channel: Channel::Normal,
            depth: 0,
        }));
        let func = call(&mut g, "Function", 0, Channel::None);
        link_chain(&mut g, &[begin, roam, drop, func, end]);

        let body = compacted(&mut g, begin);
        assert_eq!(
            body,
            "\t\tRoam();\n\t\tRoam() /* result ignored */;\n\t\tFunction();"
        );
    }

    #[test]
    fn effectful_producer_is_not_inlined_into_an_effectful_consumer() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let producer = call(&mut g, "Roam", 0, Channel::Normal);
        let consumer = call(&mut g, "delay", 1, Channel::None);
        link_chain(&mut g, &[begin, producer, consumer, end]);

        let body = compacted(&mut g, begin);
        assert_eq!(body, "\t\tstack = Roam();\n\t\tdelay(stack[0]);");
    }

    #[test]
    fn leftover_structure_is_reported() {
        let mut g = Graph::new();
        let (begin, end) = begin_end(&mut g);
        let label = g.add(NodeKind::Label(4));
        let cond = g.add(NodeKind::IfGoto {
            cond: Arg::Literal("x".to_string()),
            target: 4,
        });
        // backward jump: an irreducible loop that text packing cannot absorb
        link_chain(&mut g, &[begin, label, cond, end]);
        g.set_output(cond, 1, label);

        compact(&mut g, begin).unwrap();
        let err = stringify(&g, begin).unwrap_err();
        assert!(matches!(err, DecompileError::Internal(_)));
    }
}
