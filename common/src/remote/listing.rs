// Remote listing: the `find` query and its output

use regex::Regex;

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Build the find-by-name query for a directory and glob
pub fn find_command(directory: &str, glob: &str) -> String {
    format!(
        "find {} -name {}",
        shell_quote(directory),
        shell_quote(glob)
    )
}

/// Turn `find` output into a sorted, de-duplicated path list
pub fn parse_listing(stdout: &str) -> Vec<String> {
    let mut files: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    files.sort();
    files.dedup();
    files
}

/// Match a file name against a `find -name` style glob
///
/// Supports `*` (any characters) and `?` (single character).
pub fn glob_matches(glob: &str, name: &str) -> bool {
    let mut regex_pattern = String::with_capacity(glob.len() + 2);
    regex_pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => regex_pattern.push_str(".*"),
            '?' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_pattern.push('$');

    match Regex::new(&regex_pattern) {
        Ok(re) => re.is_match(name),
        // Fallback to simple string matching
        Err(_) => glob == name,
    }
}
