//! Opens backend pages in the host browser.
//!
//! The login flow is a plain navigation to the backend's login page; the
//! gateway only launches it and never sees the resulting session. Only
//! http(s) URLs are accepted and the URL is passed as a single argument to
//! the platform opener; no shell is used.

use async_trait::async_trait;

/// Seam for the "open a URL in the browser" side effect.
#[async_trait]
pub trait UrlOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), String>;
}

#[cfg(target_os = "macos")]
const OPENER: &[&str] = &["open"];
#[cfg(target_os = "windows")]
const OPENER: &[&str] = &["cmd", "/C", "start", ""];
#[cfg(all(unix, not(target_os = "macos")))]
const OPENER: &[&str] = &["xdg-open"];

/// Opens URLs with the platform opener binary.
pub struct SystemOpener;

#[async_trait]
impl UrlOpener for SystemOpener {
    async fn open(&self, url: &str) -> Result<(), String> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(format!("refusing to open non-http url: {}", url));
        }
        let (bin, args) = OPENER
            .split_first()
            .ok_or_else(|| "no opener for this platform".to_string())?;
        std::process::Command::new(bin)
            .args(args.iter())
            .arg(url)
            .spawn()
            .map_err(|e| format!("launching {} failed: {}", bin, e))?;
        log::info!("opened {}", url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let opener = SystemOpener;
        assert!(opener.open("file:///etc/passwd").await.is_err());
        assert!(opener.open("javascript:alert(1)").await.is_err());
    }
}
