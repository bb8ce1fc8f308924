//! Promag adapter
//!
//! Commands are single ASCII letters sent as is. Answers are
//! `STX ... CR` with the payload between, `BEL` when no tag is present, or
//! `ESC code` on error.

use bytes::Bytes;

use super::{Answer, CommandAdapter};
use crate::error::{Error, Result};
use crate::framing::{Protocol, BEL, CR, ESC, STX};
use crate::status::StatusError;

#[derive(Debug, Default)]
pub struct PromagAdapter;

impl PromagAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl CommandAdapter for PromagAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Promag
    }
    
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        Ok(command.to_vec())
    }
    
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        match frame.first().copied() {
            None => Err(Error::FrameTooShort {
                expected: 1,
                actual: 0,
            }),
            Some(BEL) => Ok(Answer::default()),
            Some(ESC) => {
                let code = frame.get(1).copied().unwrap_or(0);
                Err(StatusError::Promag(code).into())
            }
            Some(STX) => match frame[1..].split_last() {
                Some((&CR, body)) => Ok(Answer::new(Bytes::copy_from_slice(body), 0)),
                Some((&last, _)) => Err(Error::BadTerminator {
                    expected: CR,
                    actual: last,
                }),
                None => Err(Error::FrameTooShort {
                    expected: 2,
                    actual: 1,
                }),
            },
            Some(other) => Err(Error::BadMarker {
                expected: STX,
                actual: other,
            }),
        }
    }
}
