use serde_json::Value;

/// What a handler hands back to the dispatch layer.
///
/// For direct methods the status code is the externally visible method
/// result; for desired properties it is echoed inside the reported-property
/// envelope together with the response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub status_code: i32,
    pub response: Option<String>,
}

impl HandlerOutcome {
    pub fn new(status_code: i32, response: impl Into<String>) -> Self {
        Self {
            status_code,
            response: Some(response.into()),
        }
    }

    pub fn completed() -> Self {
        Self::new(200, "completed")
    }

    pub fn status_text(&self) -> &str {
        self.response.as_deref().unwrap_or("completed")
    }
}

/// Callback invoked for a matched command or desired property.
///
/// Handlers run synchronously: they execute to completion before control
/// returns to the transport layer, so long-running output blocks the
/// delivering context for its full duration.
pub type Handler = Box<dyn Fn(Option<&Value>) -> HandlerOutcome + Send + Sync>;

/// Delivery mode of a twin update, as tagged by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinUpdateKind {
    /// Delta containing only the changed desired properties.
    Partial,
    /// Complete twin snapshot with `desired` and `reported` sections.
    Full,
}

/// Typed message posted by the transport adapter onto the engine.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    TwinUpdate {
        kind: TwinUpdateKind,
        document: Value,
    },
    /// Direct method invocation; the status code of the outcome is returned
    /// to the caller.
    DirectMethod {
        name: String,
        payload: Option<Value>,
    },
    /// Cloud-to-device message carrying `methodName`/`payload` fields.
    /// Fire-and-forget: the outcome is not surfaced to the cloud.
    CloudMessage { document: Value },
}
