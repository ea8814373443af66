//! Workflow graph config parsing.
//!
//! One node per line:
//!
//! ```text
//! <kind> ':' <name> '(' [ <dep> [ 'as' <alias> ] ( ',' <dep> [ 'as' <alias> ] )* ] ')' <path>
//! ```
//!
//! Names may not contain `=`, which separates a dependency from its alias
//! on the wait step command line.
//!
//! Blank lines and lines starting with `#` are ignored. Parsing checks only
//! syntax and name uniqueness; see [`crate::validate`] for the graph checks.

use crate::{ConfigError, ConfigResult};
use flowlink_core::workflow::{Dependency, ExecutionNode, WorkflowSpec};
use std::collections::HashSet;
use std::path::Path;

/// Read and parse a graph config file, remembering its path.
pub fn load_graph(path: impl AsRef<Path>) -> ConfigResult<WorkflowSpec> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut spec = parse_graph(&text)?;
    spec.path = Some(path.to_path_buf());
    Ok(spec)
}

/// Parse a graph config into a workflow spec.
pub fn parse_graph(text: &str) -> ConfigResult<WorkflowSpec> {
    let mut nodes = Vec::new();

    for (line, raw) in text.split('\n').enumerate() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        nodes.push(parse_line(line, s)?);
    }

    let mut names = HashSet::new();
    for node in &nodes {
        if !names.insert(node.name.as_str()) {
            return Err(ConfigError::Duplicate(node.name.clone()));
        }
    }

    Ok(WorkflowSpec::new(nodes))
}

fn parse_line(line: usize, s: &str) -> ConfigResult<ExecutionNode> {
    let (kind, rest) = s
        .split_once(':')
        .ok_or(ConfigError::MissingSeparator { line })?;
    let (name, rest) = rest
        .trim()
        .split_once('(')
        .ok_or(ConfigError::MissingOpenParen { line })?;
    let (params, path) = rest
        .trim()
        .split_once(')')
        .ok_or(ConfigError::MissingCloseParen { line })?;

    let name = checked_name(line, name.trim())?;

    Ok(ExecutionNode {
        kind: kind.trim().to_string(),
        name: name.to_string(),
        dependencies: parse_params(line, params)?,
        job_spec_path: path.trim().to_string(),
    })
}

fn parse_params(line: usize, params: &str) -> ConfigResult<Vec<Dependency>> {
    if params.trim().is_empty() {
        return Ok(Vec::new());
    }

    params
        .split(',')
        .map(|param| {
            let tokens: Vec<&str> = param.split_whitespace().collect();
            match tokens.as_slice() {
                [name] => Ok(Dependency::new(checked_name(line, name)?)),
                [name, "as", alias] => {
                    Ok(Dependency::aliased(checked_name(line, name)?, *alias))
                }
                _ => Err(ConfigError::BadParam {
                    line,
                    param: param.to_string(),
                }),
            }
        })
        .collect()
}

fn checked_name(line: usize, name: &str) -> ConfigResult<&str> {
    if name.contains('=') {
        return Err(ConfigError::BadName {
            line,
            name: name.to_string(),
        });
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: &str, name: &str, deps: Vec<Dependency>, path: &str) -> ExecutionNode {
        ExecutionNode {
            kind: kind.to_string(),
            name: name.to_string(),
            dependencies: deps,
            job_spec_path: path.to_string(),
        }
    }

    #[test]
    fn test_parse_release_flow() {
        let text = r#"
# Both builds start right away.
exec: build() build.yaml
exec: build_probes() probe.yaml

# Artifacts from build land in in/build.
exec: deploy_to_dev(build) deploy_dev.yaml
exec: test_dev(deploy_to_dev, build_probes) test_dev.yaml

# Manual gate between dev and prod.
wait: dev_to_prod(test_dev) -

exec: deploy_to_prod(dev_to_prod) deploy_prod.yaml
exec: test_prod(deploy_to_prod, build_probes) test_prod.yaml
"#;

        let spec = parse_graph(text).unwrap();
        let expected = vec![
            node("exec", "build", vec![], "build.yaml"),
            node("exec", "build_probes", vec![], "probe.yaml"),
            node(
                "exec",
                "deploy_to_dev",
                vec![Dependency::new("build")],
                "deploy_dev.yaml",
            ),
            node(
                "exec",
                "test_dev",
                vec![
                    Dependency::new("deploy_to_dev"),
                    Dependency::new("build_probes"),
                ],
                "test_dev.yaml",
            ),
            node(
                "wait",
                "dev_to_prod",
                vec![Dependency::new("test_dev")],
                "-",
            ),
            node(
                "exec",
                "deploy_to_prod",
                vec![Dependency::new("dev_to_prod")],
                "deploy_prod.yaml",
            ),
            node(
                "exec",
                "test_prod",
                vec![
                    Dependency::new("deploy_to_prod"),
                    Dependency::new("build_probes"),
                ],
                "test_prod.yaml",
            ),
        ];
        assert_eq!(spec.nodes, expected);
        assert!(spec.path.is_none());
    }

    #[test]
    fn test_parse_alias() {
        let spec = parse_graph("exec: build(dep1, dep2 as d2) b.yaml").unwrap();
        assert_eq!(
            spec.nodes,
            vec![node(
                "exec",
                "build",
                vec![Dependency::new("dep1"), Dependency::aliased("dep2", "d2")],
                "b.yaml",
            )]
        );
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let spec = parse_graph("   exec :  build (  a ,b as  c )   out/b.kdl   \r\n").unwrap();
        let n = &spec.nodes[0];
        assert_eq!(n.kind, "exec");
        assert_eq!(n.name, "build");
        assert_eq!(n.dependencies, vec![Dependency::new("a"), Dependency::aliased("b", "c")]);
        assert_eq!(n.job_spec_path, "out/b.kdl");
    }

    #[test]
    fn test_empty_document() {
        let spec = parse_graph("\n# nothing here\n\n").unwrap();
        assert!(spec.is_empty());
    }

    #[test]
    fn test_duplicate_name_across_kinds() {
        let text = "exec: build() a.yaml\nwait: build() -\n";
        let err = parse_graph(text).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(ref name) if name == "build"));
    }

    #[test]
    fn test_missing_separator_line_number() {
        let text = "# header\n\nexec: ok() a.yaml\nbroken() b.yaml\n";
        let err = parse_graph(text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSeparator { line: 3 }));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_missing_open_paren() {
        let err = parse_graph("exec: build) b.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::MissingOpenParen { line: 0 }));
    }

    #[test]
    fn test_missing_close_paren() {
        let err = parse_graph("\nexec: build(a b.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::MissingCloseParen { line: 1 }));
    }

    #[test]
    fn test_bad_param_shapes() {
        let err = parse_graph("exec: build(a b) b.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::BadParam { line: 0, ref param } if param == "a b"));

        let err = parse_graph("exec: build(a as) b.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::BadParam { .. }));

        let err = parse_graph("exec: build(a, ) b.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::BadParam { .. }));
    }

    #[test]
    fn test_equals_sign_in_names_rejected() {
        let err = parse_graph("exec: a=b() -\nexec: c(a=b) -\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadName { line: 0, ref name } if name == "a=b"));

        let err = parse_graph("exec: a() -\nexec: c(a=b as x) -\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadName { line: 1, ref name } if name == "a=b"));
        assert_eq!(err.line(), Some(1));

        // Aliases are split off after the first '=' and may contain one.
        let spec = parse_graph("exec: a() -\nexec: c(a as x=y) -\n").unwrap();
        assert_eq!(spec.nodes[1].dependencies, vec![Dependency::aliased("a", "x=y")]);
    }

    #[test]
    fn test_dangling_references_are_accepted() {
        let spec = parse_graph("exec: deploy(build) d.yaml").unwrap();
        assert_eq!(spec.nodes[0].dependency_names(), vec!["build"]);
    }

    #[test]
    fn test_load_graph_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.flow");
        std::fs::write(&path, "exec: build() build.kdl\n").unwrap();

        let spec = load_graph(&path).unwrap();
        assert_eq!(spec.path.as_deref(), Some(path.as_path()));
        assert_eq!(spec.base_dir(), dir.path());
    }

    #[test]
    fn test_load_graph_missing_file() {
        let err = load_graph("/nonexistent/flowlink/graph.flow").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
