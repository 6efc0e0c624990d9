//! Device identification.

use tracing::warn;

/// Name used when the host name cannot be read.
pub const DEFAULT_DEVICE_NAME: &str = "Desktop";

/// Human-readable name of this machine, embedded into conflict copies.
///
/// Path separators are replaced so the name is always usable inside a file
/// name.
pub fn device_name() -> String {
    let name = match hostname::get() {
        Ok(name) => name.to_string_lossy().trim().to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to read host name");
            String::new()
        }
    };

    if name.is_empty() {
        return DEFAULT_DEVICE_NAME.to_string();
    }
    name.replace(['/', '\\'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_is_file_name_safe() {
        let name = device_name();
        assert!(!name.is_empty());
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
    }
}
