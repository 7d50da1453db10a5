//! Write and create dispositions applied to load and copy jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a job does when the target table already holds rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace the table contents.
    WriteTruncate,
    /// Append to the table contents.
    WriteAppend,
    /// Fail unless the table is empty.
    #[default]
    WriteEmpty,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::WriteTruncate => "WRITE_TRUNCATE",
            WriteDisposition::WriteAppend => "WRITE_APPEND",
            WriteDisposition::WriteEmpty => "WRITE_EMPTY",
        }
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job does when the target table does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateDisposition {
    /// Create the table.
    #[default]
    CreateIfNeeded,
    /// Fail the job.
    CreateNever,
}

impl CreateDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreateDisposition::CreateIfNeeded => "CREATE_IF_NEEDED",
            CreateDisposition::CreateNever => "CREATE_NEVER",
        }
    }
}

impl fmt::Display for CreateDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pair of dispositions a job runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Dispositions {
    pub write: WriteDisposition,
    pub create: CreateDisposition,
}

impl Dispositions {
    /// Dispositions for loading a partition into a fresh temp table.
    pub const STAGED: Dispositions = Dispositions {
        write: WriteDisposition::WriteEmpty,
        create: CreateDisposition::CreateIfNeeded,
    };

    pub fn new(write: WriteDisposition, create: CreateDisposition) -> Self {
        Self { write, create }
    }

    /// Same create disposition, but appending.
    ///
    /// Used once a destination was already written by an earlier pane so a
    /// later pane does not truncate or reject it.
    pub fn appending(self) -> Self {
        Self {
            write: WriteDisposition::WriteAppend,
            ..self
        }
    }
}
