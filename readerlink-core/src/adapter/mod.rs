//! Command adapters
//!
//! An adapter turns a logical command into the bytes a reader expects and
//! validates a framed answer back into an [`Answer`]. Adapters never touch
//! the transport; [`framing`](crate::framing) decides where a frame ends and
//! the adapter decides whether it is correct.

pub mod axess;
pub mod osdp;
pub mod promag;
pub mod rpleth;
pub mod stidprg;
pub mod stidstr;

use bytes::Bytes;

use crate::error::Result;
use crate::framing::Protocol;

pub use axess::AxessTmc13Adapter;
pub use osdp::{OsdpAdapter, OsdpReply};
pub use promag::PromagAdapter;
pub use rpleth::{RplethAdapter, RplethFrame};
pub use stidprg::StidPrgAdapter;
pub use stidstr::StidStrAdapter;

/// Validated answer payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Answer {
    /// Payload with framing, integrity and status bytes removed
    pub data: Bytes,
    
    /// Protocol status or reply code (0 when the protocol has none)
    pub status: u8,
}

impl Answer {
    pub fn new(data: impl Into<Bytes>, status: u8) -> Self {
        Self {
            data: data.into(),
            status,
        }
    }
}

/// Wraps commands for the wire and unwraps answers from it
pub trait CommandAdapter: Send {
    /// Framing rule for answers
    fn protocol(&self) -> Protocol;
    
    /// Encode a logical command
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>>;
    
    /// Validate and decode one extracted frame
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer>;
}

impl<A: CommandAdapter + ?Sized> CommandAdapter for Box<A> {
    fn protocol(&self) -> Protocol {
        (**self).protocol()
    }
    
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        (**self).adapt_command(command)
    }
    
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        (**self).adapt_answer(frame)
    }
}
