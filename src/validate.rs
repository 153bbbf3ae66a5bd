//! Boundary checks for target and subscription input.
//!
//! Everything here returns [`WatchError::Validation`], which callers of
//! create/update surface directly.

use url::Url;

use sitewatch_core::extract::xpath_to_css;
use sitewatch_core::models::{NewTarget, Owner, TargetUpdate};
use sitewatch_core::{Result, WatchError};

/// Limits applied to caller-supplied target fields.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub max_pages_cap: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
            max_interval_secs: 30 * 24 * 3600,
            max_pages_cap: 20,
        }
    }
}

pub fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw.trim())
        .map_err(|e| WatchError::validation(format!("invalid url '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(WatchError::validation(format!(
            "url must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(WatchError::validation(format!("url '{}' has no host", raw)));
    }
    Ok(())
}

pub fn validate_interval(secs: u64, limits: &Limits) -> Result<()> {
    if secs < limits.min_interval_secs || secs > limits.max_interval_secs {
        return Err(WatchError::validation(format!(
            "interval must be between {} and {} seconds, got {}",
            limits.min_interval_secs, limits.max_interval_secs, secs
        )));
    }
    Ok(())
}

pub fn validate_selector(selector: &str) -> Result<()> {
    if selector.trim().is_empty() {
        return Err(WatchError::validation("selector must not be empty"));
    }
    scraper::Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| WatchError::validation(format!("invalid css selector '{}': {}", selector, e)))
}

pub fn validate_xpath(xpath: &str) -> Result<()> {
    match xpath_to_css(xpath) {
        Some(_) => Ok(()),
        None => Err(WatchError::validation(format!(
            "unsupported xpath '{}': use element steps, attribute predicates, contains(), starts-with() or [n]",
            xpath
        ))),
    }
}

pub fn validate_max_pages(pages: u32, limits: &Limits) -> Result<()> {
    if pages == 0 || pages > limits.max_pages_cap {
        return Err(WatchError::validation(format!(
            "max_pages must be between 1 and {}, got {}",
            limits.max_pages_cap, pages
        )));
    }
    Ok(())
}

/// A deliberately loose shape check: one `@`, non-empty local part, a
/// dotted domain, no whitespace.
pub fn validate_email(email: &str) -> Result<()> {
    let invalid = || WatchError::validation(format!("invalid email address '{}'", email));
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

fn validate_owner(owner: &Owner) -> Result<()> {
    match owner {
        Owner::Agent { agent_id } if agent_id.trim().is_empty() => {
            Err(WatchError::validation("agent_id must not be empty"))
        }
        Owner::Agent { .. } => Ok(()),
        Owner::Email { email } => validate_email(email),
    }
}

pub fn validate_new_target(new: &NewTarget, limits: &Limits) -> Result<()> {
    validate_owner(&new.owner)?;
    validate_url(&new.url)?;
    validate_interval(new.interval_secs, limits)?;
    validate_max_pages(new.max_pages, limits)?;
    if let Some(selector) = &new.selector {
        validate_selector(selector)?;
    }
    if let Some(xpath) = &new.xpath {
        validate_xpath(xpath)?;
    }
    Ok(())
}

pub fn validate_update(update: &TargetUpdate, limits: &Limits) -> Result<()> {
    if let Some(url) = &update.url {
        validate_url(url)?;
    }
    if let Some(secs) = update.interval_secs {
        validate_interval(secs, limits)?;
    }
    if let Some(pages) = update.max_pages {
        validate_max_pages(pages, limits)?;
    }
    if let Some(Some(selector)) = &update.selector {
        validate_selector(selector)?;
    }
    if let Some(Some(xpath)) = &update.xpath {
        validate_xpath(xpath)?;
    }
    Ok(())
}
