// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `X-Trace` identifier.
//!
//! Hex encoding (upper case) of: one version byte, a 20-byte task id shared by every
//! event of a trace, an 8-byte op id naming one event, and a flags byte whose low bit
//! is the sampled flag. A sampled identifier therefore ends in `01` and an unsampled
//! one in `00`.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const XTRACE_HEADER: &str = "X-Trace";

const VERSION: u8 = 0x2B;
const TASK_ID_LEN: usize = 20;
const OP_ID_LEN: usize = 8;
const ENCODED_LEN: usize = 1 + TASK_ID_LEN + OP_ID_LEN + 1;
const FLAG_SAMPLED: u8 = 0x01;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum XTraceParseError {
    #[error("expected {expected} hex characters, got {0}", expected = ENCODED_LEN * 2)]
    Length(usize),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("unsupported version byte {0:#04X}")]
    Version(u8),
    #[error("task id is all zeros")]
    EmptyTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XTrace {
    task_id: [u8; TASK_ID_LEN],
    op_id: [u8; OP_ID_LEN],
    flags: u8,
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    loop {
        bytes.iter_mut().for_each(|b| *b = fastrand::u8(..));
        if bytes.iter().any(|b| *b != 0) {
            return bytes;
        }
    }
}

impl XTrace {
    /// Starts a new trace with a random task id.
    pub fn new_trace(sampled: bool) -> Self {
        XTrace {
            task_id: random_bytes(),
            op_id: random_bytes(),
            flags: if sampled { FLAG_SAMPLED } else { 0 },
        }
    }

    /// Same task and flags, new op id.
    pub fn next_op(&self) -> Self {
        XTrace {
            op_id: random_bytes(),
            ..*self
        }
    }

    pub fn with_sampled(self, sampled: bool) -> Self {
        let flags = if sampled {
            self.flags | FLAG_SAMPLED
        } else {
            self.flags & !FLAG_SAMPLED
        };
        XTrace { flags, ..self }
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }

    pub fn task_id(&self) -> &[u8; TASK_ID_LEN] {
        &self.task_id
    }

    pub fn op_id(&self) -> &[u8; OP_ID_LEN] {
        &self.op_id
    }

    /// Op id as upper-case hex, used as the event identifier in edges.
    pub fn op_id_hex(&self) -> String {
        hex::encode_upper(self.op_id)
    }
}

impl fmt::Display for XTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}{}{}{:02X}",
            VERSION,
            hex::encode_upper(self.task_id),
            hex::encode_upper(self.op_id),
            self.flags
        )
    }
}

impl FromStr for XTrace {
    type Err = XTraceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != ENCODED_LEN * 2 {
            return Err(XTraceParseError::Length(s.len()));
        }
        let bytes = hex::decode(s)?;
        if bytes[0] != VERSION {
            return Err(XTraceParseError::Version(bytes[0]));
        }
        let mut task_id = [0u8; TASK_ID_LEN];
        task_id.copy_from_slice(&bytes[1..=TASK_ID_LEN]);
        if task_id.iter().all(|b| *b == 0) {
            return Err(XTraceParseError::EmptyTask);
        }
        let mut op_id = [0u8; OP_ID_LEN];
        op_id.copy_from_slice(&bytes[1 + TASK_ID_LEN..1 + TASK_ID_LEN + OP_ID_LEN]);
        Ok(XTrace {
            task_id,
            op_id,
            flags: bytes[ENCODED_LEN - 1],
        })
    }
}

impl Serialize for XTrace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
