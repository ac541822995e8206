use anyhow::bail;

/// A provider endpoint [url](url::Url) with additional guarantees.
///
/// Construction rejects cannot-be-a-base URLs, so request building can rely
/// on the URL being usable as an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct ApiUrl(url::Url);

impl ApiUrl {
    /// Consume the wrapper and return the inner [url](url::Url).
    pub(crate) fn into_inner(self) -> url::Url {
        self.0
    }
}

/// This instance imposes additional requirements on the url.
impl std::str::FromStr for ApiUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let url: url::Url = s.parse()?;

        if url.cannot_be_a_base() {
            bail!("bad endpoint url provided");
        }

        Ok(Self(url))
    }
}

impl TryFrom<String> for ApiUrl {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        s.parse()
    }
}

/// This instance is safe because it doesn't allow us to modify the object.
impl std::ops::Deref for ApiUrl {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ApiUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bad_url() {
        let url = "mailto:foo@bar";
        url.parse::<url::Url>().expect("unexpected parsing failure");
        url.parse::<ApiUrl>().expect_err("should not parse");
    }

    #[test]
    fn good_url() {
        let url = "https://provider.example.com/auth/v1/keys";
        let a = url.parse::<url::Url>().unwrap();
        let b = url.parse::<ApiUrl>().unwrap();
        assert_eq!(a, b.into_inner());
    }
}
