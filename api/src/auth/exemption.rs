use axum::http::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExemptionEntry {
    pub path: String,
    /// `None` exempts every method.
    pub methods: Option<Vec<Method>>,
}

impl ExemptionEntry {
    pub fn any_method(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: None,
        }
    }

    pub fn with_methods(path: impl Into<String>, methods: &[Method]) -> Self {
        Self {
            path: path.into(),
            methods: Some(methods.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// `/login` covers `/login` and `/login/...`, not `/loginX`.
    Segment,
    /// Legacy behaviour: any path containing the entry.
    Substring,
}

#[derive(Debug, Clone)]
pub struct ExemptionMatcher {
    entries: Vec<ExemptionEntry>,
    mode: MatchMode,
}

impl ExemptionMatcher {
    pub fn new(entries: Vec<ExemptionEntry>, mode: MatchMode) -> Self {
        Self { entries, mode }
    }

    pub fn is_exempt(&self, path: &str, method: &Method) -> bool {
        self.entries.iter().any(|entry| {
            self.path_matches(path, &entry.path)
                && entry
                    .methods
                    .as_ref()
                    .map_or(true, |methods| methods.contains(method))
        })
    }

    fn path_matches(&self, path: &str, pattern: &str) -> bool {
        match self.mode {
            MatchMode::Substring => path.contains(pattern),
            MatchMode::Segment => match path.strip_prefix(pattern) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || pattern.ends_with('/'),
                None => false,
            },
        }
    }
}
