//! Structured description of a registered callback

use serde::{Deserialize, Serialize};
use syshook_core::{CallbackPhase, InterceptError, Result, Sysno};

use crate::declaration::find_declaration;

/// Everything a controller can learn about a callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackInfo {
    pub sysno: Sysno,

    #[serde(rename = "entry-point", default)]
    pub entry_point: String,

    pub source: String,

    /// Source of the entry-point function alone
    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(rename = "type")]
    pub phase: CallbackPhase,
}

impl CallbackInfo {
    /// Describe `source` as the callback for (`sysno`, `phase`) with entry point `entry_point`
    ///
    /// Body and parameter names come from the entry point's declaration when
    /// the source contains one.
    pub fn new(
        sysno: Sysno,
        phase: CallbackPhase,
        entry_point: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let mut info = CallbackInfo {
            sysno,
            entry_point: entry_point.into(),
            source: source.into(),
            body: String::new(),
            args: Vec::new(),
            phase,
        };
        info.fill_from_declaration();
        info
    }

    /// Placeholder for a callback whose origin cannot be described
    pub fn unknown(sysno: Sysno, phase: CallbackPhase) -> Self {
        CallbackInfo {
            sysno,
            entry_point: "unknown".to_string(),
            source: "unknown".to_string(),
            body: "unknown".to_string(),
            args: Vec::new(),
            phase,
        }
    }

    /// Fill missing entry point, body and parameter names
    ///
    /// An empty entry point falls back to [`conventional_entry_point`].
    pub fn fill_from_declaration(&mut self) {
        if self.entry_point.is_empty() {
            self.entry_point = conventional_entry_point(self.phase, self.sysno);
        }
        if let Some(decl) = find_declaration(&self.source, &self.entry_point) {
            if self.body.is_empty() {
                self.body = decl.body;
            }
            if self.args.is_empty() {
                self.args = decl.params;
            }
        }
        if self.body.is_empty() {
            self.body = self.source.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(InterceptError::InvalidCallback(format!(
                "{} callback for syscall {} has empty source",
                self.phase, self.sysno
            )));
        }
        if self.entry_point.trim().is_empty() {
            return Err(InterceptError::InvalidCallback(format!(
                "{} callback for syscall {} has no entry point",
                self.phase, self.sysno
            )));
        }
        Ok(())
    }
}

/// Entry-point name used when none is given: `sys_before_7`, `sys_after_49`
pub fn conventional_entry_point(phase: CallbackPhase, sysno: Sysno) -> String {
    format!("sys_{}_{}", phase, sysno)
}
