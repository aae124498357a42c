//! Call-context carriers read by the pickers.
//!
//! Callers tag a request with write intent and a group affinity; the
//! transport turns the request's extensions into a `CallContext` before
//! asking the picker for a connection.

/// Whether a call reads or writes. Calls are reads unless tagged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestKind {
    #[default]
    Read,
    Write,
}

/// Restricts a call to backends of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAffinity(pub String);

/// What a picker knows about the call it is choosing a backend for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    kind: RequestKind,
    group: Option<String>,
}

impl CallContext {
    pub fn read() -> Self {
        Self::default()
    }

    pub fn write() -> Self {
        Self {
            kind: RequestKind::Write,
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn is_write(&self) -> bool {
        self.kind == RequestKind::Write
    }

    /// Requested group; the empty group when the call carries none.
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or("")
    }

    pub fn from_extensions(extensions: &tonic::Extensions) -> Self {
        Self {
            kind: extensions.get::<RequestKind>().copied().unwrap_or_default(),
            group: extensions
                .get::<GroupAffinity>()
                .map(|affinity| affinity.0.clone()),
        }
    }
}

/// Tagging helpers for outgoing requests.
pub trait RequestExt: Sized {
    /// Route this call using write weights.
    fn with_write_intent(self) -> Self;

    /// Route this call only to backends in `group`.
    fn with_group(self, group: impl Into<String>) -> Self;

    fn call_context(&self) -> CallContext;
}

impl<T> RequestExt for tonic::Request<T> {
    fn with_write_intent(mut self) -> Self {
        self.extensions_mut().insert(RequestKind::Write);
        self
    }

    fn with_group(mut self, group: impl Into<String>) -> Self {
        self.extensions_mut().insert(GroupAffinity(group.into()));
        self
    }

    fn call_context(&self) -> CallContext {
        CallContext::from_extensions(self.extensions())
    }
}
