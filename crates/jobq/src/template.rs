//! Expansion of `{{.name}}` directives in the style of Go templates

use std::{fmt::Display, sync::OnceLock};

use regex::{Captures, Regex};

static DIRECTIVE: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownDirective(pub String);

impl Display for UnknownDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown template directive {{{{.{}}}}}", self.0)
    }
}

impl std::error::Error for UnknownDirective {}

/// replace every `{{.key}}` in `template` with the value paired with `key` in
/// `vars`. a directive with no entry in `vars` is an error rather than being
/// left in place
pub fn expand(
    template: &str,
    vars: &[(&str, &str)],
) -> Result<String, UnknownDirective> {
    let re = DIRECTIVE
        .get_or_init(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").unwrap());
    let mut missing = None;
    let ret = re.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match vars.iter().find(|(k, _)| *k == key) {
            Some((_, v)) => v.to_string(),
            None => {
                missing.get_or_insert_with(|| key.to_owned());
                String::new()
            }
        }
    });
    match missing {
        Some(key) => Err(UnknownDirective(key)),
        None => Ok(ret.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_all() {
        let got = expand(
            "cd {{.dir}} && run {{.geom}} > {{ .results }} # {{.geom}}",
            &[("dir", "pts/0"), ("geom", "geom.xyz"), ("results", "r.json")],
        )
        .unwrap();
        assert_eq!(got, "cd pts/0 && run geom.xyz > r.json # geom.xyz");
    }

    #[test]
    fn rejects_unknown() {
        let got = expand("{{.dir}} {{.charge}}", &[("dir", "x")]);
        assert_eq!(got, Err(UnknownDirective("charge".to_owned())));
    }

    #[test]
    fn leaves_plain_braces() {
        let got = expand("awk '{print $1}' {{.f}}", &[("f", "a")]).unwrap();
        assert_eq!(got, "awk '{print $1}' a");
    }
}
