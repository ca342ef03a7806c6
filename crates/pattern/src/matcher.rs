use std::collections::HashMap;

use crate::{ClassItem, GroupKind, MatchOptions, Node};

/// Capture spans recorded during a successful anchored match.
#[derive(Debug, Clone)]
pub struct Captures<'a> {
    input: &'a str,
    /// byte spans, 1-based group index at `spans[index - 1]`
    spans: Vec<Option<(usize, usize)>>,
    names: HashMap<String, usize>,
}

impl<'a> Captures<'a> {
    pub(crate) fn new(
        input: &'a str,
        char_spans: Vec<Option<(usize, usize)>>,
        names: &HashMap<String, usize>,
    ) -> Self {
        // matcher spans are char-indexed; convert to byte offsets once
        let mut byte_at: Vec<usize> = Vec::with_capacity(input.len() + 1);
        for (byte, _) in input.char_indices() {
            byte_at.push(byte);
        }
        byte_at.push(input.len());
        let spans = char_spans
            .into_iter()
            .map(|span| span.map(|(s, e)| (byte_at[s], byte_at[e])))
            .collect();
        Self {
            input,
            spans,
            names: names.clone(),
        }
    }

    /// Whole matched input (`$&`).
    pub fn full(&self) -> &'a str {
        self.input
    }

    /// 1-based numbered group (`$1`, `$2`, …).
    pub fn get(&self, index: usize) -> Option<&'a str> {
        let (start, end) = (*self.spans.get(index.checked_sub(1)?)?)?;
        Some(&self.input[start..end])
    }

    /// Named group (`$<name>`).
    pub fn name(&self, name: &str) -> Option<&'a str> {
        self.get(*self.names.get(name)?)
    }

    /// Substitutes `$<name>`, `$1`…, `$&`, and `$$` in `template`.
    /// Unresolvable references expand to the empty string.
    pub fn expand(&self, template: &str) -> String {
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] != '$' || i + 1 >= chars.len() {
                out.push(chars[i]);
                i += 1;
                continue;
            }
            match chars[i + 1] {
                '$' => {
                    out.push('$');
                    i += 2;
                }
                '&' => {
                    out.push_str(self.full());
                    i += 2;
                }
                '<' => {
                    let mut j = i + 2;
                    while j < chars.len() && chars[j] != '>' {
                        j += 1;
                    }
                    if j < chars.len() {
                        let name: String = chars[i + 2..j].iter().collect();
                        if let Some(value) = self.name(&name) {
                            out.push_str(value);
                        }
                        i = j + 1;
                    } else {
                        out.push('$');
                        i += 1;
                    }
                }
                c if c.is_ascii_digit() => {
                    let mut j = i + 1;
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    let index: usize = chars[i + 1..j]
                        .iter()
                        .collect::<String>()
                        .parse()
                        .unwrap_or(0);
                    if let Some(value) = self.get(index) {
                        out.push_str(value);
                    }
                    i = j;
                }
                _ => {
                    out.push('$');
                    i += 1;
                }
            }
        }
        out
    }
}

struct Cx<'i> {
    input: &'i [char],
    opts: MatchOptions,
}

struct Caps {
    spans: Vec<Option<(usize, usize)>>,
    starts: Vec<usize>,
}

type Snapshot = (Vec<Option<(usize, usize)>>, Vec<usize>);

#[derive(Clone, Copy)]
enum Step<'p> {
    Nodes(&'p [Node]),
    /// close capture group at current position
    End(usize),
    /// decide whether to re-enter a `*(…)`/`+(…)` group; the second field
    /// is the position this iteration started at (progress guard)
    Again(&'p Node, usize),
}

struct Cont<'a, 'p> {
    step: Step<'p>,
    next: Option<&'a Cont<'a, 'p>>,
}

/// Anchored match; on success returns per-group char spans (1-based group
/// `i` at element `i - 1`).
pub(crate) fn matches(
    nodes: &[Node],
    candidate: &str,
    opts: MatchOptions,
    capture_count: usize,
) -> Option<Vec<Option<(usize, usize)>>> {
    let input: Vec<char> = candidate.chars().collect();
    let cx = Cx {
        input: &input,
        opts,
    };
    let mut caps = Caps {
        spans: vec![None; capture_count],
        starts: vec![0; capture_count],
    };
    if run(&cx, Step::Nodes(nodes), None, 0, &mut caps) {
        Some(caps.spans)
    } else {
        None
    }
}

fn segment_start(input: &[char], pos: usize) -> bool {
    pos == 0 || input[pos - 1] == '/'
}

/// Dot rule: a wildcard may not match `.` at a segment start.
fn wildcard_blocked(cx: &Cx, pos: usize) -> bool {
    cx.opts.require_literal_leading_dot
        && pos < cx.input.len()
        && cx.input[pos] == '.'
        && segment_start(cx.input, pos)
}

fn continue_with<'p>(
    cx: &Cx,
    cont: Option<&Cont<'_, 'p>>,
    pos: usize,
    caps: &mut Caps,
) -> bool {
    match cont {
        Some(c) => run(cx, c.step, c.next, pos, caps),
        None => pos == cx.input.len(),
    }
}

fn save(caps: &Caps) -> Snapshot {
    (caps.spans.clone(), caps.starts.clone())
}

fn restore(caps: &mut Caps, saved: Snapshot) {
    caps.spans = saved.0;
    caps.starts = saved.1;
}

fn run<'p>(
    cx: &Cx,
    step: Step<'p>,
    cont: Option<&Cont<'_, 'p>>,
    pos: usize,
    caps: &mut Caps,
) -> bool {
    match step {
        Step::End(index) => {
            caps.spans[index - 1] = Some((caps.starts[index - 1], pos));
            continue_with(cx, cont, pos, caps)
        }
        Step::Again(node, entry) => {
            let Node::Group {
                branches, index, ..
            } = node
            else {
                unreachable!("Again step always carries a group node");
            };
            // greedy: another iteration first, provided the last one consumed
            if pos > entry {
                let again = Cont {
                    step: Step::Again(node, pos),
                    next: cont,
                };
                for branch in branches {
                    let saved = save(caps);
                    if run(cx, Step::Nodes(branch), Some(&again), pos, caps) {
                        return true;
                    }
                    restore(caps, saved);
                }
            }
            caps.spans[*index - 1] = Some((caps.starts[*index - 1], pos));
            continue_with(cx, cont, pos, caps)
        }
        Step::Nodes(nodes) => {
            let Some((first, rest)) = nodes.split_first() else {
                return continue_with(cx, cont, pos, caps);
            };
            match first {
                Node::Lit(lit) => {
                    let mut p = pos;
                    for ch in lit.chars() {
                        if cx.input.get(p) != Some(&ch) {
                            return false;
                        }
                        p += 1;
                    }
                    run(cx, Step::Nodes(rest), cont, p, caps)
                }
                Node::Any => {
                    if pos >= cx.input.len() || cx.input[pos] == '/' || wildcard_blocked(cx, pos)
                    {
                        return false;
                    }
                    run(cx, Step::Nodes(rest), cont, pos + 1, caps)
                }
                Node::Class { negated, items } => {
                    if pos >= cx.input.len() || cx.input[pos] == '/' || wildcard_blocked(cx, pos)
                    {
                        return false;
                    }
                    let c = cx.input[pos];
                    let hit = items.iter().any(|item| match item {
                        ClassItem::Ch(ch) => *ch == c,
                        ClassItem::Range(lo, hi) => *lo <= c && c <= *hi,
                    });
                    if hit == *negated {
                        return false;
                    }
                    run(cx, Step::Nodes(rest), cont, pos + 1, caps)
                }
                Node::Star => {
                    let limit = if wildcard_blocked(cx, pos) {
                        0
                    } else {
                        cx.input[pos..].iter().take_while(|c| **c != '/').count()
                    };
                    for n in (0..=limit).rev() {
                        if run(cx, Step::Nodes(rest), cont, pos + n, caps) {
                            return true;
                        }
                    }
                    false
                }
                Node::Globstar => {
                    // may cross segments, but never consumes a segment-leading dot
                    let mut limit = 0;
                    while pos + limit < cx.input.len() {
                        if wildcard_blocked(cx, pos + limit) {
                            break;
                        }
                        limit += 1;
                    }
                    for n in (0..=limit).rev() {
                        if run(cx, Step::Nodes(rest), cont, pos + n, caps) {
                            return true;
                        }
                    }
                    false
                }
                Node::Alt(branches) => {
                    let tail = Cont {
                        step: Step::Nodes(rest),
                        next: cont,
                    };
                    for branch in branches {
                        let saved = save(caps);
                        if run(cx, Step::Nodes(branch), Some(&tail), pos, caps) {
                            return true;
                        }
                        restore(caps, saved);
                    }
                    false
                }
                Node::Group {
                    kind,
                    branches,
                    index,
                    ..
                } => {
                    caps.starts[*index - 1] = pos;
                    let tail = Cont {
                        step: Step::Nodes(rest),
                        next: cont,
                    };
                    match kind {
                        GroupKind::Exact | GroupKind::ZeroOrOne => {
                            let close = Cont {
                                step: Step::End(*index),
                                next: Some(&tail),
                            };
                            for branch in branches {
                                let saved = save(caps);
                                if run(cx, Step::Nodes(branch), Some(&close), pos, caps) {
                                    return true;
                                }
                                restore(caps, saved);
                            }
                            if *kind == GroupKind::ZeroOrOne {
                                caps.spans[*index - 1] = None;
                                return run(cx, Step::Nodes(rest), cont, pos, caps);
                            }
                            false
                        }
                        GroupKind::ZeroOrMore | GroupKind::OneOrMore => {
                            let again = Cont {
                                step: Step::Again(first, pos),
                                next: Some(&tail),
                            };
                            for branch in branches {
                                let saved = save(caps);
                                if run(cx, Step::Nodes(branch), Some(&again), pos, caps) {
                                    return true;
                                }
                                restore(caps, saved);
                            }
                            if *kind == GroupKind::ZeroOrMore {
                                caps.spans[*index - 1] = None;
                                return run(cx, Step::Nodes(rest), cont, pos, caps);
                            }
                            false
                        }
                        GroupKind::Not => {
                            // any span within the segment not matched by a branch
                            let limit = if wildcard_blocked(cx, pos) {
                                0
                            } else {
                                cx.input[pos..].iter().take_while(|c| **c != '/').count()
                            };
                            for n in (0..=limit).rev() {
                                let span: String = cx.input[pos..pos + n].iter().collect();
                                if branches.iter().any(|b| standalone(b, &span)) {
                                    continue;
                                }
                                let saved = save(caps);
                                caps.spans[*index - 1] = Some((pos, pos + n));
                                if run(cx, Step::Nodes(rest), cont, pos + n, caps) {
                                    return true;
                                }
                                restore(caps, saved);
                            }
                            false
                        }
                    }
                }
            }
        }
    }
}

/// Standalone anchored match used to test `!(…)` branch exclusion; captures
/// inside the excluded branches are not recorded.
fn standalone(nodes: &[Node], span: &str) -> bool {
    matches(nodes, span, MatchOptions::default(), max_group_index(nodes)).is_some()
}

// Group indices are numbered across the whole pattern, so the span table for
// a subtree match must be sized to the largest index it can touch.
fn max_group_index(nodes: &[Node]) -> usize {
    let mut acc = 0;
    fn visit(nodes: &[Node], acc: &mut usize) {
        for node in nodes {
            match node {
                Node::Alt(branches) => {
                    for b in branches {
                        visit(b, acc);
                    }
                }
                Node::Group {
                    branches, index, ..
                } => {
                    *acc = (*acc).max(*index);
                    for b in branches {
                        visit(b, acc);
                    }
                }
                _ => {}
            }
        }
    }
    visit(nodes, &mut acc);
    acc
}
