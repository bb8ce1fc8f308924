//! Axess TMC 13.56 MHz adapter: ASCII commands terminated by CR

use bytes::Bytes;

use super::{Answer, CommandAdapter};
use crate::error::{Error, Result};
use crate::framing::{Protocol, CR};

#[derive(Debug, Default)]
pub struct AxessTmc13Adapter;

impl AxessTmc13Adapter {
    pub fn new() -> Self {
        Self
    }
}

impl CommandAdapter for AxessTmc13Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::AxessTmc13
    }
    
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut out = command.to_vec();
        out.push(CR);
        Ok(out)
    }
    
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        match frame.split_last() {
            Some((&CR, body)) => Ok(Answer::new(Bytes::copy_from_slice(body), 0)),
            Some((&last, _)) => Err(Error::BadTerminator {
                expected: CR,
                actual: last,
            }),
            None => Err(Error::FrameTooShort {
                expected: 1,
                actual: 0,
            }),
        }
    }
}
