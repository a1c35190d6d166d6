use anyhow::{bail, Result};
use std::collections::HashMap;

/// Fill `{name}` placeholders from `vars`. `{{` and `}}` are literal braces.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => bail!("unterminated placeholder in {:?}", template),
                    }
                }
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => bail!("unknown placeholder {{{}}} in {:?}", name, template),
                }
            }
            '}' => bail!("single '}}' in {:?}", template),
            c => out.push(c),
        }
    }
    Ok(out)
}
