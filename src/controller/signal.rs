use url::form_urlencoded;

const REFRESH_KEY: &str = "refresh";

/// One-shot "refresh on arrival" hint, e.g. `?refresh=true` after repository selection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSignal {
    pending: bool,
}

impl RefreshSignal {
    pub fn pending() -> Self {
        Self { pending: true }
    }

    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let pending = form_urlencoded::parse(query.as_bytes())
            .any(|(key, value)| key == REFRESH_KEY && value == "true");
        Self { pending }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns whether a refresh was pending, clearing it.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}
