//! Opening URLs in the operator's browser.

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Opens a URL for the operator.
#[cfg_attr(test, automock)]
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// The platform default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        webbrowser::open(url).map_err(|e| Error::BrowserLaunch {
            message: e.to_string(),
        })
    }
}
