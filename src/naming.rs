//! File and directory naming in output trees.
//!
//! Album names are user-editable and file names may repeat; both have to
//! become unique, safe path components. The first claimant of a name keeps
//! it bare, later ones get `_1`, `_2`, ... before the extension.

use std::collections::HashSet;

/// Directory name for an album. Keeps letters, digits, space, `-`, `_`
/// and `.`; everything else becomes `_`. Leading dots and surrounding
/// whitespace are dropped.
pub fn sanitize_dir_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// A record name made safe to use as one path component.
pub fn safe_file_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `("IMG_1", ".jpg")`. A leading dot does not start an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

pub fn with_suffix(name: &str, n: usize) -> String {
    let (stem, ext) = split_extension(name);
    format!("{}_{}{}", stem, n, ext)
}

/// Names handed out within one directory. Comparison ignores case so the
/// result is the same on case-insensitive filesystems.
#[derive(Debug, Default)]
pub struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name`, or the first free suffixed variant of it.
    pub fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_lowercase()) {
            return name.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = with_suffix(name, n);
            if self.taken.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_album_names() {
        assert_eq!(sanitize_dir_name("Summer 2020", "Unnamed Album"), "Summer 2020");
        assert_eq!(sanitize_dir_name("a/b:c", "Unnamed Album"), "a_b_c");
        assert_eq!(sanitize_dir_name("   ", "Unnamed Album"), "Unnamed Album");
        assert_eq!(sanitize_dir_name("..", "Unnamed Album"), "Unnamed Album");
        assert_eq!(sanitize_dir_name("???", "Unnamed Album"), "Unnamed Album");
        assert_eq!(sanitize_dir_name("Café", "x"), "Café");
    }

    #[test]
    fn file_names_lose_separators() {
        assert_eq!(safe_file_name("a/b.jpg", "cid"), "a_b.jpg");
        assert_eq!(safe_file_name("..", "cid"), "cid");
        assert_eq!(safe_file_name("", "cid"), "cid");
    }

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(with_suffix("IMG_1.jpg", 1), "IMG_1_1.jpg");
        assert_eq!(with_suffix("README", 2), "README_2");
        assert_eq!(with_suffix(".hidden", 1), ".hidden_1");
        assert_eq!(with_suffix("a.tar.gz", 1), "a.tar_1.gz");
    }

    #[test]
    fn first_claim_keeps_bare_name() {
        let mut names = UniqueNames::new();
        assert_eq!(names.claim("a.jpg"), "a.jpg");
        assert_eq!(names.claim("a.jpg"), "a_1.jpg");
        assert_eq!(names.claim("A.JPG"), "A_2.JPG");
        assert_eq!(names.claim("a_1.jpg"), "a_1_1.jpg");
    }
}
