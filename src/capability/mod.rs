// src/capability/mod.rs

//! Narrow interfaces the engine consumes
//!
//! The engine never reaches for process-wide state. Version control, template
//! rendering, prompting, command execution, registry lookups and the clock
//! are all capabilities handed in through an [`EngineContext`]. Each has a
//! stock implementation plus an in-process variant usable as a test fake.

mod clock;
mod exec;
mod prompt;
mod registry;
mod template;
mod vcs;

pub use clock::{CancelToken, Clock, FixedClock, SystemClock};
pub use exec::{Exec, ExecOutput, ExecRequest, ProcessExec};
pub use prompt::{NonInteractive, Prompt, PromptAnswer};
pub use registry::{Registry, StaticRegistry};
pub use template::{slug, BraceRenderer, TemplateRenderer};
pub use vcs::{GitCli, MemoryVcs, NoVcs, Vcs};

use crate::receipt::ReceiptSigner;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Capabilities and caller flags for one engine call
#[derive(Clone)]
pub struct EngineContext {
    pub vcs: Arc<dyn Vcs>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub prompt: Arc<dyn Prompt>,
    pub exec: Option<Arc<dyn Exec>>,
    pub registry: Option<Arc<dyn Registry>>,
    pub clock: Arc<dyn Clock>,
    pub signer: Option<Arc<dyn ReceiptSigner>>,
    pub cancel: CancelToken,
    /// Caller approval for policies with `require_approval`
    pub approved: bool,
    /// Known runtime versions (name -> version) for `requires.runtimes`
    pub runtimes: BTreeMap<String, String>,
}

impl EngineContext {
    /// Context backed by `git` on PATH and non-interactive prompting
    pub fn new() -> Self {
        Self::with_vcs(Arc::new(GitCli::detect()))
    }

    /// Context with an explicit VCS and stock everything else
    pub fn with_vcs(vcs: Arc<dyn Vcs>) -> Self {
        Self {
            vcs,
            renderer: Arc::new(BraceRenderer),
            prompt: Arc::new(NonInteractive::default()),
            exec: None,
            registry: None,
            clock: Arc::new(SystemClock),
            signer: None,
            cancel: CancelToken::new(),
            approved: false,
            runtimes: BTreeMap::new(),
        }
    }

    pub fn vcs(mut self, vcs: Arc<dyn Vcs>) -> Self {
        self.vcs = vcs;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn exec(mut self, exec: Arc<dyn Exec>) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn signer(mut self, signer: Arc<dyn ReceiptSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    pub fn runtime(mut self, name: &str, version: &str) -> Self {
        self.runtimes.insert(name.to_string(), version.to_string());
        self
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}
