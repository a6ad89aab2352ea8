/// Bearer token sent to the dashboard backend. Never printed.
#[derive(Clone)]
pub struct ApiToken(String);

impl From<&str> for ApiToken {
    fn from(value: &str) -> Self {
        Self(value.trim().to_owned())
    }
}

impl ApiToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted>")
    }
}
