//! Object-key helpers.
//!
//! The gateway exposes a flat "folder of files" view over a key space rooted at
//! a fixed prefix (`user/` by default). These helpers build keys from client
//! input and project listings back into that view.

use std::collections::BTreeSet;

use crate::error::GatewayError;

/// Longest object name the provider accepts, in bytes.
pub const MAX_FILE_NAME_BYTES: usize = 1024;

/// Validate a client-supplied folder path and return it without surrounding
/// slashes. Nested folders (`a/b`) are allowed.
pub fn clean_folder(folder: &str) -> Result<String, GatewayError> {
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(GatewayError::Validation(
            "Folder name must not be empty".to_string(),
        ));
    }

    for segment in trimmed.split('/') {
        check_segment(segment, "folder")?;
    }

    Ok(trimmed.to_string())
}

/// Validate a client-supplied file name. File names are a single path segment.
pub fn clean_file_name(name: &str) -> Result<&str, GatewayError> {
    let name = name.trim();
    if name.contains('/') {
        return Err(GatewayError::Validation(format!(
            "File name '{}' must not contain '/'",
            name
        )));
    }
    check_segment(name, "file")?;
    Ok(name)
}

fn check_segment(segment: &str, what: &str) -> Result<(), GatewayError> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(GatewayError::Validation(format!(
            "Invalid {} path segment '{}'",
            what, segment
        )));
    }
    if segment.chars().any(char::is_control) {
        return Err(GatewayError::Validation(format!(
            "{} name contains control characters",
            what
        )));
    }
    Ok(())
}

/// Listing prefix for a folder: `root + folder + "/"`.
pub fn folder_prefix(root: &str, folder: &str) -> Result<String, GatewayError> {
    Ok(format!("{}{}/", root, clean_folder(folder)?))
}

/// Destination key of an upload: `root + [folder + "/"] + name`.
pub fn object_key(root: &str, folder: Option<&str>, name: &str) -> Result<String, GatewayError> {
    let name = clean_file_name(name)?;
    let key = match folder {
        Some(folder) => format!("{}{}", folder_prefix(root, folder)?, name),
        None => format!("{}{}", root, name),
    };

    if key.len() > MAX_FILE_NAME_BYTES {
        return Err(GatewayError::Validation(format!(
            "Object name is {} bytes long (limit is {})",
            key.len(),
            MAX_FILE_NAME_BYTES
        )));
    }

    Ok(key)
}

/// Whether `key` sits directly under `prefix` (no further separators).
pub fn is_direct_child(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => !rest.is_empty() && !rest.contains('/'),
        None => false,
    }
}

/// First path segment after `root` of every key that has one, sorted and
/// deduplicated. Keys directly under the root are skipped.
pub fn folder_names<'a, I>(keys: I, root: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    keys.into_iter()
        .filter_map(|key| key.strip_prefix(root))
        .filter_map(|rest| rest.split_once('/'))
        .map(|(first, _)| first)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Last path segment of a key, used as the download file name.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
