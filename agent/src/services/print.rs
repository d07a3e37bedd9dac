//! Distributed graph rendering
//!
//! A graph prints as an indented tree, one line per node. Subtrees owned
//! by other peers are fetched as pre-rendered fragments over the streaming
//! call and spliced in at the reference position, with the owning peer
//! named in brackets on the boundary line.

use super::io::NodeIoService;
use crate::errors::{MeshError, Result};
use crate::network::ClientPool;
use crate::reference::reachable_refs;
use crate::tensor::{ptr_key, Tensor, TensorKind};
use std::collections::HashMap;
use std::sync::Arc;

pub struct PrintService {
    io: Arc<NodeIoService>,
    pool: Arc<ClientPool>,
}

impl PrintService {
    pub fn new(io: Arc<NodeIoService>, pool: Arc<ClientPool>) -> Self {
        Self { io, pool }
    }

    /// Render a tree, fetching one fragment per reachable reference.
    pub async fn render(&self, root: &Tensor) -> Result<String> {
        let mut fragments: HashMap<usize, String> = HashMap::new();
        for t in reachable_refs(&[root.clone()]) {
            let Some(r) = t.as_remote() else { continue };
            let client = self.pool.for_peer(r.cluster_id()).await?;
            let streamed = client.stream_ascii(r.node_id().to_string()).await?;
            let text = streamed
                .into_iter()
                .find(|(id, _)| id == r.node_id())
                .map(|(_, text)| text)
                .ok_or_else(|| {
                    MeshError::NotFound(format!(
                        "peer {} streamed no fragment for {}",
                        r.cluster_id(),
                        r.node_id()
                    ))
                })?;
            fragments.insert(ptr_key(&t), text);
        }
        Ok(render_tree(root, &fragments))
    }

    /// Server side of a streaming render request.
    pub async fn handle_stream_ascii(&self, id: &str) -> Result<(String, String)> {
        let t = self
            .io
            .local_node(id)
            .ok_or_else(|| MeshError::NotFound(format!("node {} is not local", id)))?;
        let text = self.render(&t).await?;
        Ok((id.to_string(), text))
    }
}

/// Pure rendering over a tree with pre-fetched reference fragments.
fn render_tree(root: &Tensor, fragments: &HashMap<usize, String>) -> String {
    let mut out = String::new();
    let mut blocks: Vec<&'static str> = Vec::new();
    emit(root, 0, &mut blocks, false, fragments, &mut out);
    out
}

fn emit(
    t: &Tensor,
    depth: usize,
    blocks: &mut Vec<&'static str>,
    has_following: bool,
    fragments: &HashMap<usize, String>,
    out: &mut String,
) {
    if let TensorKind::Remote(r) = &t.kind {
        let text = match fragments.get(&ptr_key(t)) {
            Some(text) => text.as_str(),
            // render stays total; an unfetched fragment degrades to a line
            None => return emit_line(t, depth, blocks, out),
        };
        let mut lines = text.lines();
        let first = lines.next().unwrap_or("");
        if depth == 0 {
            out.push_str(&format!("[{}]:{}\n", r.cluster_id(), first));
        } else {
            out.push('_');
            out.push_str(&blocks.concat());
            out.push_str(&format!("`--[{}]:{}\n", r.cluster_id(), first));
        }
        // remaining remote lines keep their own indentation, shifted under
        // the reference position
        let ref_block = if has_following { "|___" } else { "____" };
        for line in lines {
            out.push('_');
            out.push_str(&blocks.concat());
            if depth > 0 {
                out.push_str(ref_block);
            }
            out.push_str(line.strip_prefix('_').unwrap_or(line));
            out.push('\n');
        }
        return;
    }

    emit_line(t, depth, blocks, out);

    let args = t.args();
    for (i, child) in args.iter().enumerate() {
        if depth > 0 {
            blocks.push(if has_following { "|___" } else { "____" });
        }
        emit(child, depth + 1, blocks, i + 1 < args.len(), fragments, out);
        if depth > 0 {
            blocks.pop();
        }
    }
}

fn emit_line(t: &Tensor, depth: usize, blocks: &[&'static str], out: &mut String) {
    if depth == 0 {
        out.push_str(&format!("({})\n", t.label()));
    } else {
        out.push('_');
        out.push_str(&blocks.concat());
        out.push_str(&format!("`--({})\n", t.label()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::RemoteReference;
    use crate::tensor::{Dtype, TensorNode};

    fn var(label: &str) -> Tensor {
        TensorNode::variable(label, Dtype::F64, vec![3])
    }

    #[test]
    fn test_render_local_tree() {
        // SUB(src2, MUL(src, src))
        let src = var("src");
        let mul = TensorNode::operation("MUL", vec![src.clone(), src]);
        let root = TensorNode::operation("SUB", vec![var("src2"), mul]);

        let text = render_tree(&root, &HashMap::new());
        let expected = "(SUB)\n\
                        _`--(variable:src2)\n\
                        _`--(MUL)\n\
                        _____`--(variable:src)\n\
                        _____`--(variable:src)\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_splices_remote_fragment() {
        // SUB(src2, POW(DIV(<mgr2:NEG>, ADD(SIN(src), src)), osrc2))
        let src = var("src");
        let neg = TensorNode::remote(RemoteReference::new("mgr2", "neg", Dtype::F64, vec![3]));
        let sin = TensorNode::operation("SIN", vec![src.clone()]);
        let add = TensorNode::operation("ADD", vec![sin, src]);
        let div = TensorNode::operation("DIV", vec![neg.clone(), add]);
        let pow = TensorNode::operation("POW", vec![div, var("osrc2")]);
        let root = TensorNode::operation("SUB", vec![var("src2"), pow]);

        let mut fragments = HashMap::new();
        fragments.insert(
            ptr_key(&neg),
            "(NEG)\n_`--(variable:osrc)\n".to_string(),
        );

        let text = render_tree(&root, &fragments);
        let expected = "(SUB)\n\
                        _`--(variable:src2)\n\
                        _`--(POW)\n\
                        _____`--(DIV)\n\
                        _____|___`--[mgr2]:(NEG)\n\
                        _____|___|___`--(variable:osrc)\n\
                        _____|___`--(ADD)\n\
                        _____|_______`--(SIN)\n\
                        _____|_______|___`--(variable:src)\n\
                        _____|_______`--(variable:src)\n\
                        _____`--(variable:osrc2)\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_remote_root() {
        let far = TensorNode::remote(RemoteReference::new("mgr2", "r", Dtype::F64, vec![1]));
        let mut fragments = HashMap::new();
        fragments.insert(ptr_key(&far), "(NEG)\n_`--(variable:osrc)\n".to_string());
        let text = render_tree(&far, &fragments);
        assert_eq!(text, "[mgr2]:(NEG)\n_`--(variable:osrc)\n");
    }
}
