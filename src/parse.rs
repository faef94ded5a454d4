use anyhow::Result;

use crate::spec::{BuildIdentifier, BuildNumber};

/// Parse `name[/number]`. A missing number (or the literal `LATEST`) selects
/// the most recently started build.
pub fn parse_build(input: &str) -> Result<BuildIdentifier> {
    let input = input.trim();
    if input.is_empty() {
        return Err(anyhow::anyhow!("build must be given as <name>[/<number>]"));
    }
    // build names may contain '/', the number never does
    let (name, number) = match input.rsplit_once('/') {
        Some((n, num)) if !n.is_empty() && !num.is_empty() => (n, Some(num)),
        Some((n, "")) if !n.is_empty() => (n, None),
        Some(_) => return Err(anyhow::anyhow!("build name is empty: {}", input)),
        None => (input, None),
    };
    let number = match number {
        None | Some("LATEST") => BuildNumber::Latest,
        Some(n) => BuildNumber::Number(n.to_string()),
    };
    Ok(BuildIdentifier { name: name.to_string(), number })
}

/// Parse `k=v;k2=v2`. Empty segments are ignored; a key may repeat.
pub fn parse_props(input: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for seg in input.split(';') {
        let seg = seg.trim();
        if seg.is_empty() {
            continue;
        }
        let (k, v) = seg
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("property '{}' is not in key=value form", seg))?;
        let k = k.trim();
        if k.is_empty() {
            return Err(anyhow::anyhow!("property key is empty in '{}'", seg));
        }
        out.push((k.to_string(), v.trim().to_string()));
    }
    Ok(out)
}

/// Parse a comma separated list of property keys for delete-props.
pub fn parse_prop_keys(input: &str) -> Vec<String> {
    input.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string).collect()
}

/// Split the CLI form of exclude patterns (`p1;p2`).
pub fn split_patterns(input: &str) -> Vec<String> {
    input.split(';').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}

/// Split `repo/some/path` into the repository and the path inside it.
pub fn split_repo_path(input: &str) -> (&str, &str) {
    let trimmed = input.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((repo, rest)) => (repo, rest),
        None => (trimmed, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_with_number() {
        let b = parse_build("app/12").unwrap();
        assert_eq!(b.name, "app");
        assert_eq!(b.number, BuildNumber::Number("12".into()));
    }

    #[test]
    fn build_latest_forms() {
        assert_eq!(parse_build("app").unwrap().number, BuildNumber::Latest);
        assert_eq!(parse_build("app/LATEST").unwrap().number, BuildNumber::Latest);
        let nested = parse_build("team/app/7").unwrap();
        assert_eq!(nested.name, "team/app");
        assert_eq!(nested.number, BuildNumber::Number("7".into()));
    }

    #[test]
    fn build_rejects_empty() {
        assert!(parse_build("").is_err());
        assert!(parse_build("/12").is_err());
    }

    #[test]
    fn props_parse_and_skip_empty() {
        let p = parse_props("a=1;;b=two;").unwrap();
        assert_eq!(p, vec![("a".into(), "1".into()), ("b".into(), "two".into())]);
        assert!(parse_props("novalue").is_err());
        assert!(parse_props("=x").is_err());
    }

    #[test]
    fn repo_path_split() {
        assert_eq!(split_repo_path("repo/a/b"), ("repo", "a/b"));
        assert_eq!(split_repo_path("repo"), ("repo", ""));
        assert_eq!(split_repo_path("/repo/x"), ("repo", "x"));
    }

    #[test]
    fn patterns_and_keys() {
        assert_eq!(split_patterns("*b*; *c* ;"), vec!["*b*".to_string(), "*c*".to_string()]);
        assert_eq!(parse_prop_keys("a, b,,"), vec!["a".to_string(), "b".to_string()]);
    }
}
