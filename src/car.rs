//! Content addressable archives (CARv1).
//!
//! A container is a length prefixed DAG-CBOR header listing the root ids, followed by one length prefixed
//! section per block holding the block id and its bytes.

use crate::block::{Block, EncodingError};
use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// The content type for serialized containers.
pub const CONTENT_TYPE: &str = "application/vnd.ipld.car";

const CAR_VERSION: u64 = 1;
const MAX_SECTION_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct CarHeader {
    roots: Vec<Cid>,
    version: u64,
}

/// A streaming container writer.
///
/// The header is written when the writer is created; blocks are written as they're offered. The writer
/// must be finished explicitly and refuses blocks afterwards.
pub struct CarWriter<W> {
    sink: W,
    closed: bool,
}

impl<W> CarWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer and write the header with the given roots.
    pub async fn new(mut sink: W, roots: &[Cid]) -> Result<Self, ContainerError> {
        let header = CarHeader { roots: roots.to_vec(), version: CAR_VERSION };
        let header = serde_ipld_dagcbor::to_vec(&header).map_err(|e| EncodingError::Encode(e.to_string()))?;
        let mut section = Vec::with_capacity(header.len() + 4);
        write_varint(&mut section, header.len() as u64)?;
        section.extend_from_slice(&header);
        sink.write_all(&section).await?;
        Ok(Self { sink, closed: false })
    }

    /// Write a block.
    pub async fn write(&mut self, block: &Block) -> Result<(), ContainerError> {
        if self.closed {
            return Err(ContainerError::WriteAfterClose);
        }
        let cid = block.cid().to_bytes();
        let bytes = block.bytes();
        let mut section = Vec::with_capacity(cid.len() + bytes.len() + 4);
        write_varint(&mut section, (cid.len() + bytes.len()) as u64)?;
        section.extend_from_slice(&cid);
        section.extend_from_slice(bytes);
        self.sink.write_all(&section).await?;
        Ok(())
    }

    /// Flush and close this writer.
    pub async fn finish(&mut self) -> Result<(), ContainerError> {
        if self.closed {
            return Err(ContainerError::WriteAfterClose);
        }
        self.closed = true;
        self.sink.flush().await?;
        Ok(())
    }

    /// Get a mutable reference to the underlying sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Unwrap the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Stream a container holding the given roots and blocks.
///
/// Every section is yielded as soon as it's encoded, so callers can start sending bytes before every block
/// was produced. The stream only ends cleanly after the writer is finished. A block source failure ends it
/// with that error, and dropping it releases both the writer and the block source.
pub fn stream<S>(roots: Vec<Cid>, blocks: S) -> impl Stream<Item = Result<Bytes, ContainerError>> + Send + 'static
where
    S: Stream<Item = Result<Block, ContainerError>> + Send + 'static,
{
    try_stream! {
        let mut writer = CarWriter::new(Vec::new(), &roots).await?;
        yield Bytes::from(std::mem::take(writer.get_mut()));

        pin_mut!(blocks);
        while let Some(block) = blocks.next().await {
            writer.write(&block?).await?;
            yield Bytes::from(std::mem::take(writer.get_mut()));
        }
        writer.finish().await?;
    }
}

/// A fully read container.
#[derive(Debug)]
pub struct Car {
    /// The root ids.
    pub roots: Vec<Cid>,

    /// The blocks, in the order they were written.
    pub blocks: Vec<Block>,
}

impl Car {
    /// Find a block by id.
    pub fn get(&self, cid: &Cid) -> Option<&Block> {
        self.blocks.iter().find(|block| block.cid() == cid)
    }
}

/// A container reader.
pub struct CarReader;

impl CarReader {
    /// Read a complete container.
    ///
    /// Every block id is checked against the block bytes. A container that ends in the middle of a section,
    /// or that's missing any of its roots, is reported as truncated.
    pub fn read_all(input: &[u8]) -> Result<Car, ContainerError> {
        let mut cursor = Cursor::new(input);
        let header = read_section(&mut cursor, input)?.ok_or(ContainerError::Truncated)?;
        let header: CarHeader =
            serde_ipld_dagcbor::from_slice(header).map_err(|e| EncodingError::Decode(e.to_string()))?;
        if header.version != CAR_VERSION {
            return Err(ContainerError::UnsupportedVersion(header.version));
        }

        let mut blocks = Vec::new();
        while let Some(section) = read_section(&mut cursor, input)? {
            let mut section_cursor = Cursor::new(section);
            let cid = Cid::read_bytes(&mut section_cursor).map_err(|e| ContainerError::InvalidCid(e.to_string()))?;
            let offset = section_cursor.position() as usize;
            let block = Block::from_parts(cid, Bytes::copy_from_slice(&section[offset..]))?;
            blocks.push(block);
        }

        let car = Car { roots: header.roots, blocks };
        if car.roots.iter().any(|root| car.get(root).is_none()) {
            return Err(ContainerError::Truncated);
        }
        Ok(car)
    }
}

fn read_section<'a>(cursor: &mut Cursor<&'a [u8]>, input: &'a [u8]) -> Result<Option<&'a [u8]>, ContainerError> {
    let start = cursor.position() as usize;
    if start == input.len() {
        return Ok(None);
    }
    let length = leb128::read::unsigned(cursor).map_err(|_| ContainerError::Truncated)?;
    if length == 0 || length > MAX_SECTION_SIZE {
        return Err(ContainerError::InvalidSectionLength(length));
    }
    let begin = cursor.position() as usize;
    let end = begin + length as usize;
    if end > input.len() {
        return Err(ContainerError::Truncated);
    }
    cursor.set_position(end as u64);
    Ok(Some(&input[begin..end]))
}

fn write_varint(buffer: &mut Vec<u8>, value: u64) -> Result<(), ContainerError> {
    leb128::write::unsigned(buffer, value)?;
    Ok(())
}

/// An error when writing or reading a container.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("block written after the container was closed")]
    WriteAfterClose,

    #[error("container is truncated")]
    Truncated,

    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u64),

    #[error("invalid section length: {0}")]
    InvalidSectionLength(u64),

    #[error("invalid block id: {0}")]
    InvalidCid(String),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
