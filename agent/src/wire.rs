//! Peer-to-peer wire protocol
//!
//! Messages are CBOR, length-prefixed with a big-endian u32. A connection
//! carries one request and either a single response or, for streaming
//! calls, a sequence of `StreamItem`s terminated by `Done`. Frames are
//! capped so a corrupt length prefix cannot trigger a huge allocation.

use crate::errors::{MeshError, Result};
use crate::graph::GraphDescription;
use crate::graph::partition::Topography;
use crate::query::PatternNode;
use crate::tensor::Dtype;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on a single frame
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Serialized identity of one exposed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Published node id
    pub id: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    /// Peer id of the owner
    pub instance: String,
}

/// One pattern match, with every capture resolved to an exposed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedResult {
    pub root: NodeMeta,
    pub symbols: BTreeMap<String, NodeMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Resolve exposed node ids to their metadata
    DescribeNodes { ids: Vec<String> },
    /// Evaluate a pattern against the subtrees rooted at `roots`
    PatternQuery {
        pattern: PatternNode,
        roots: Vec<String>,
    },
    /// Materialize a graph fragment; `refs` name nodes resolved elsewhere
    LoadGraph {
        graph: GraphDescription,
        refs: Vec<NodeMeta>,
    },
    /// Serialize the peer's exposed graphs
    SaveGraph,
    /// Stream the rendering of an owned subtree
    StreamAscii { id: String },
    /// Push a newer data version into cached references for `id`
    UpdateData {
        id: String,
        version: u64,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Nodes(Vec<NodeMeta>),
    Matches(Vec<MatchedResult>),
    /// Metas of the outputs materialized by a `LoadGraph`
    Loaded(Vec<NodeMeta>),
    Saved {
        graph: GraphDescription,
        topography: Topography,
    },
    Updated {
        applied: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// One unit of a streaming response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamItem {
    /// Rendered lines for the subtree rooted at `id`
    Fragment { id: String, text: String },
    Done,
}

/// Error taxonomy as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    Timeout,
    Conflict,
    InternalInconsistency,
    /// Server-side fault with no cross-peer meaning
    Internal,
}

impl From<&MeshError> for ErrorKind {
    fn from(e: &MeshError) -> Self {
        match e {
            MeshError::NotFound(_) => ErrorKind::NotFound,
            MeshError::Unavailable(_) => ErrorKind::Unavailable,
            MeshError::Timeout(_) => ErrorKind::Timeout,
            MeshError::Conflict(_) => ErrorKind::Conflict,
            MeshError::InternalInconsistency(_) => ErrorKind::InternalInconsistency,
            MeshError::Io(_) => ErrorKind::Unavailable,
            MeshError::Serialization(_) | MeshError::Config(_) => ErrorKind::Internal,
        }
    }
}

impl ErrorKind {
    /// Rebuild the local error a remote peer reported.
    pub fn into_error(self, message: String) -> MeshError {
        match self {
            ErrorKind::NotFound => MeshError::NotFound(message),
            ErrorKind::Unavailable => MeshError::Unavailable(message),
            ErrorKind::Timeout => MeshError::Timeout(message),
            ErrorKind::Conflict => MeshError::Conflict(message),
            ErrorKind::InternalInconsistency => MeshError::InternalInconsistency(message),
            ErrorKind::Internal => MeshError::InternalInconsistency(message),
        }
    }
}

impl Response {
    pub fn from_error(e: &MeshError) -> Self {
        Response::Error {
            kind: e.into(),
            message: e.to_string(),
        }
    }
}

/// Write one length-prefixed CBOR frame.
pub async fn write_frame<T, W>(writer: &mut W, msg: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    ciborium::into_writer(msg, &mut buf)
        .map_err(|e| MeshError::Serialization(format!("encoding frame: {}", e)))?;
    if buf.len() > MAX_FRAME_BYTES {
        return Err(MeshError::Serialization(format!(
            "frame of {} bytes exceeds the {} byte cap",
            buf.len(),
            MAX_FRAME_BYTES
        )));
    }
    writer.write_all(&(buf.len() as u32).to_be_bytes()).await?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed CBOR frame.
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(MeshError::Serialization(format!(
            "incoming frame of {} bytes exceeds the {} byte cap",
            len, MAX_FRAME_BYTES
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    ciborium::from_reader(buf.as_slice())
        .map_err(|e| MeshError::Serialization(format!("decoding frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::PatternNode;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = Request::PatternQuery {
            pattern: PatternNode::operator(
                "ADD",
                vec![PatternNode::symbol("A"), PatternNode::symbol("A")],
            ),
            roots: vec!["root1".into()],
        };
        write_frame(&mut client, &request).await.unwrap();
        let decoded: Request = read_frame(&mut server).await.unwrap();
        assert_eq!(request, decoded);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        client.write_all(&len).await.unwrap();

        let err = read_frame::<Request, _>(&mut server).await.unwrap_err();
        assert!(matches!(err, MeshError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_stream_items_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(
            &mut client,
            &StreamItem::Fragment {
                id: "root1".into(),
                text: "(SUB)\n".into(),
            },
        )
        .await
        .unwrap();
        write_frame(&mut client, &StreamItem::Done).await.unwrap();

        let first: StreamItem = read_frame(&mut server).await.unwrap();
        let second: StreamItem = read_frame(&mut server).await.unwrap();
        assert!(matches!(first, StreamItem::Fragment { .. }));
        assert_eq!(second, StreamItem::Done);
    }

    #[test]
    fn test_error_kind_round_trip() {
        let err = MeshError::Conflict("id taken".into());
        let kind: ErrorKind = (&err).into();
        let back = kind.into_error("id taken".into());
        assert!(matches!(back, MeshError::Conflict(_)));
    }
}
