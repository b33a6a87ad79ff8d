//! Keyed Children Diff
//!
//! Reconciles a mounted children list against a new one when siblings carry
//! keys. Host nodes are reused for every `(type, key)` present on both sides;
//! only the nodes that have to change position are moved.
//!
//! # Algorithm
//!
//! 1. Sync the common prefix (patch while the heads match).
//! 2. Sync the common suffix (patch while the tails match).
//! 3. Old side exhausted: mount the remaining new nodes before the node that
//!    follows them.
//! 4. New side exhausted: unmount the remaining old nodes.
//! 5. Otherwise, map each remaining old node to its new index (by key, or by
//!    type for unkeyed nodes), patch matches and unmount leftovers. Record
//!    the old position of every new node.
//! 6. Walk the new range backwards. Mount new nodes with no old counterpart;
//!    move nodes that are not part of the longest increasing subsequence of
//!    old positions. Nodes on that subsequence are already in relative order
//!    and stay put, which keeps the number of moves minimal.

use std::collections::HashMap;

use super::host::HostNode;
use super::renderer::{MountContext, MountedNode, Renderer};
use super::vnode::{NodeKey, VNode};

pub(crate) fn patch_keyed_children(
    renderer: &Renderer,
    mounted: &mut Vec<MountedNode>,
    next: &[VNode],
    container: HostNode,
    parent_anchor: Option<HostNode>,
    ctx: &MountContext,
) {
    let mut old: Vec<Option<MountedNode>> = std::mem::take(mounted).into_iter().map(Some).collect();
    let mut result: Vec<Option<MountedNode>> = next.iter().map(|_| None).collect();

    let mut start = 0;
    let mut old_end = old.len();
    let mut new_end = next.len();

    // 1. prefix
    while start < old_end && start < new_end {
        let Some(node) = take_if_same(&mut old[start], &next[start]) else {
            break;
        };
        result[start] = Some(patched(renderer, node, &next[start], container, ctx));
        start += 1;
    }

    // 2. suffix
    while start < old_end && start < new_end {
        let Some(node) = take_if_same(&mut old[old_end - 1], &next[new_end - 1]) else {
            break;
        };
        result[new_end - 1] = Some(patched(renderer, node, &next[new_end - 1], container, ctx));
        old_end -= 1;
        new_end -= 1;
    }

    if start >= old_end {
        // 3. only additions left
        let anchor = anchor_after(renderer, &result, new_end, parent_anchor);
        for index in start..new_end {
            result[index] = Some(renderer.mount(&next[index], container, anchor, ctx));
        }
    } else if start >= new_end {
        // 4. only removals left
        for node in old[start..old_end].iter_mut().filter_map(Option::take) {
            renderer.unmount(node, true);
        }
    } else {
        // 5. unknown middle sequence
        let span = new_end - start;
        let key_to_new: HashMap<&NodeKey, usize> = (start..new_end)
            .filter_map(|index| next[index].key().map(|key| (key, index)))
            .collect();

        // Old position + 1 of each new node; 0 means "mount fresh".
        let mut new_to_old = vec![0usize; span];
        let mut moved = false;
        let mut max_new_index = 0;
        let mut patched_count = 0;

        for old_index in start..old_end {
            let Some(node) = old[old_index].take() else {
                continue;
            };
            if patched_count >= span {
                renderer.unmount(node, true);
                continue;
            }

            let new_index = match node.vnode.key() {
                Some(key) => key_to_new.get(key).copied(),
                None => (start..new_end).find(|&index| {
                    new_to_old[index - start] == 0
                        && next[index].key().is_none()
                        && node.vnode.same_type(&next[index])
                }),
            };

            match new_index {
                Some(index) if new_to_old[index - start] == 0 && node.vnode.same_type(&next[index]) => {
                    new_to_old[index - start] = old_index + 1;
                    if index >= max_new_index {
                        max_new_index = index;
                    } else {
                        moved = true;
                    }
                    result[index] = Some(patched(renderer, node, &next[index], container, ctx));
                    patched_count += 1;
                }
                // No counterpart, a duplicate key, or the same key on a node
                // of another type: remove it and let step 6 mount fresh.
                _ => renderer.unmount(node, true),
            }
        }

        // 6. move and mount
        let mut stable = if moved {
            longest_increasing_subsequence(&new_to_old)
        } else {
            Vec::new()
        };

        for offset in (0..span).rev() {
            let index = start + offset;
            let anchor = anchor_after(renderer, &result, index + 1, parent_anchor);

            if new_to_old[offset] == 0 {
                result[index] = Some(renderer.mount(&next[index], container, anchor, ctx));
            } else if moved {
                if stable.last() == Some(&offset) {
                    stable.pop();
                } else if let Some(node) = &result[index] {
                    renderer.move_node(node, container, anchor);
                }
            }
        }
    }

    *mounted = result.into_iter().flatten().collect();
}

fn take_if_same(slot: &mut Option<MountedNode>, next: &VNode) -> Option<MountedNode> {
    if slot.as_ref().is_some_and(|node| node.vnode.same_type(next)) {
        slot.take()
    } else {
        None
    }
}

fn patched(renderer: &Renderer, mut node: MountedNode, next: &VNode, container: HostNode, ctx: &MountContext) -> MountedNode {
    renderer.patch(&mut node, next, container, ctx);
    node
}

/// First host node at or after `from` in the new list, else the list's own
/// anchor.
fn anchor_after(
    renderer: &Renderer,
    result: &[Option<MountedNode>],
    from: usize,
    parent_anchor: Option<HostNode>,
) -> Option<HostNode> {
    result
        .iter()
        .skip(from)
        .flatten()
        .find_map(|node| renderer.first_host(node))
        .or(parent_anchor)
}

/// Indices of a longest strictly increasing subsequence of `values`,
/// ignoring zero entries.
pub(crate) fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; values.len()];

    for (index, &value) in values.iter().enumerate() {
        if value == 0 {
            continue;
        }
        let pos = tails.partition_point(|&tail| values[tail] < value);
        if pos > 0 {
            prev[index] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(index);
        } else {
            tails[pos] = index;
        }
    }

    let mut sequence = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        sequence.push(index);
        cursor = prev[index];
    }
    sequence.reverse();
    sequence
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::memory::{HostOp, MemoryHost};
    use crate::render::vnode::Props;
    use std::rc::Rc;

    fn keyed_list(keys: &[&str]) -> VNode {
        VNode::element(
            "ul",
            Props::new(),
            keys.iter()
                .map(|key| VNode::element("li", Props::new(), vec![VNode::text(*key)]).with_key(*key))
                .collect(),
        )
    }

    fn rendered(keys: &[&str]) -> String {
        let items: String = keys.iter().map(|key| format!("<li>{key}</li>")).collect();
        format!("<ul>{items}</ul>")
    }

    fn transition(from: &[&str], to: &[&str]) -> Rc<MemoryHost> {
        let host = Rc::new(MemoryHost::new());
        let renderer = Renderer::new(host.clone());
        let root = host.create_root();
        renderer.render(Some(keyed_list(from)), root);
        host.clear_ops();
        renderer.render(Some(keyed_list(to)), root);
        assert_eq!(host.inner_html(root), rendered(to));
        host
    }

    #[test]
    fn lis_skips_zeros() {
        assert_eq!(longest_increasing_subsequence(&[3, 1, 2]), vec![1, 2]);
        assert_eq!(longest_increasing_subsequence(&[0, 5, 0, 6]), vec![1, 3]);
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[2, 1]).len(), 1);
    }

    #[test]
    fn rotate_moves_one_node() {
        let host = transition(&["a", "b", "c"], &["c", "a", "b"]);
        assert_eq!(host.count_ops(HostOp::is_move), 1);
        assert_eq!(host.count_ops(HostOp::is_create), 0);
        assert_eq!(host.count_ops(HostOp::is_remove), 0);
    }

    #[test]
    fn reverse_moves_all_but_one() {
        let host = transition(&["a", "b", "c", "d"], &["d", "c", "b", "a"]);
        assert_eq!(host.count_ops(HostOp::is_move), 3);
        assert_eq!(host.count_ops(HostOp::is_create), 0);
    }

    #[test]
    fn insert_in_the_middle() {
        let host = transition(&["a", "c"], &["a", "b", "c"]);
        assert_eq!(host.count_ops(HostOp::is_move), 0);
        // <li> and its text.
        assert_eq!(host.count_ops(HostOp::is_create), 2);
    }

    #[test]
    fn remove_from_the_middle() {
        let host = transition(&["a", "b", "c"], &["a", "c"]);
        assert_eq!(host.count_ops(HostOp::is_remove), 1);
        assert_eq!(host.count_ops(HostOp::is_move), 0);
    }

    #[test]
    fn mixed_replace_and_reorder() {
        let host = transition(&["a", "b", "c", "d", "e"], &["a", "d", "x", "b", "e"]);
        assert_eq!(host.count_ops(HostOp::is_remove), 1);
        assert_eq!(host.count_ops(HostOp::is_move), 1);
    }

    #[test]
    fn same_key_different_type_is_remounted() {
        let host = Rc::new(MemoryHost::new());
        let renderer = Renderer::new(host.clone());
        let root = host.create_root();
        let list = |tag: &str| {
            VNode::element(
                "div",
                Props::new(),
                vec![
                    VNode::element("b", Props::new(), vec![]).with_key("x"),
                    VNode::element(tag, Props::new(), vec![]).with_key("y"),
                ],
            )
        };
        renderer.render(Some(list("i")), root);
        renderer.render(Some(list("u")), root);
        assert_eq!(host.inner_html(root), "<div><b></b><u></u></div>");
    }
}
