//! `modules.alias` index and alias matching
use regex::Regex;

/// Turn dashes into underscores, except inside `[...]` classes.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_class = false;
    for c in name.chars() {
        match c {
            '[' => in_class = true,
            ']' => in_class = false,
            _ => {}
        }
        out.push(if c == '-' && !in_class { '_' } else { c });
    }
    out
}

/// One `alias <pattern> <module>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub pattern: String,
    pub module: String,
}

impl AliasEntry {
    /// Whether `name` matches this entry's shell-style pattern.
    pub fn matches(&self, name: &str) -> bool {
        let prefix = literal_prefix(&self.pattern);
        if prefix.len() == self.pattern.len() {
            return self.pattern == name;
        }
        if !name.starts_with(prefix) {
            return false;
        }
        match glob_to_regex(&self.pattern) {
            Ok(re) => re.is_match(name),
            Err(_) => false,
        }
    }
}

/// Parse the contents of a `modules.alias` file. Comments and lines not
/// shaped like `alias PATTERN MODULE` are skipped.
pub fn parse_aliases(content: &str) -> Vec<AliasEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some("alias"), Some(pattern), Some(module)) => Some(AliasEntry {
                    pattern: normalize_name(pattern),
                    module: module.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Module names whose aliases match `name`, deduplicated, in index order.
pub fn lookup<'a>(aliases: &'a [AliasEntry], name: &str) -> Vec<&'a str> {
    let mut modules: Vec<&str> = Vec::new();
    for entry in aliases.iter().filter(|entry| entry.matches(name)) {
        if !modules.contains(&entry.module.as_str()) {
            modules.push(&entry.module);
        }
    }
    modules
}

fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?', '[']) {
        Some(pos) => &pattern[..pos],
        None => pattern,
    }
}

/// Translate an fnmatch-style pattern into an anchored regular expression.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if let Some(&'!') = chars.peek() {
                    chars.next();
                    re.push('^');
                }
                // a `]` right after the opening bracket is a member, not the end
                if let Some(&']') = chars.peek() {
                    chars.next();
                    re.push_str("\\]");
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' || c == '[' || c == '&' || c == '~' {
                        re.push('\\');
                    }
                    re.push(c);
                }
                re.push(']');
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}
