use crate::error::{RenderError, Result};

/// Expands `#ifdef` / `#ifndef` / `#else` / `#endif` against `defines`.
///
/// Directive lines are dropped and so are the lines of inactive branches;
/// nesting is supported. Anything else starting with `#` is passed through
/// untouched.
pub fn preprocess(template: &str, source: &str, defines: &[&str]) -> Result<String> {
    // One entry per open block: whether its current branch is taken
    let mut stack: Vec<bool> = Vec::new();
    let mut out = String::with_capacity(source.len());

    let error = |line: usize, message: &str| RenderError::Preprocess {
        template: template.to_string(),
        line,
        message: message.to_string(),
    };

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim_start();
        let active = stack.iter().all(|taken| *taken);

        if let Some(rest) = trimmed.strip_prefix("#ifdef") {
            let name = rest.trim();
            if name.is_empty() {
                return Err(error(line_no, "#ifdef without a name"));
            }
            stack.push(defines.contains(&name));
        } else if let Some(rest) = trimmed.strip_prefix("#ifndef") {
            let name = rest.trim();
            if name.is_empty() {
                return Err(error(line_no, "#ifndef without a name"));
            }
            stack.push(!defines.contains(&name));
        } else if trimmed.starts_with("#else") {
            let Some(top) = stack.last_mut() else {
                return Err(error(line_no, "#else without #ifdef"));
            };
            *top = !*top;
        } else if trimmed.starts_with("#endif") {
            if stack.pop().is_none() {
                return Err(error(line_no, "#endif without #ifdef"));
            }
        } else if active {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !stack.is_empty() {
        return Err(error(source.lines().count(), "unterminated #ifdef"));
    }

    Ok(out)
}
