//! Plain-text dependency listing

use crate::dag::DependencyGraph;
use crate::scheduler::DeployOrder;
use gitsnow_core::ObjectName;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::PathBuf;

/// A defined object with its files and dependencies (in deploy order)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedObject {
    pub name: ObjectName,
    pub paths: Vec<PathBuf>,
    pub dependencies: Vec<ObjectName>,
}

/// Defined objects in deploy order, each with its dependencies sorted by deploy order
pub fn dependency_ordered_objects(graph: &DependencyGraph, order: &DeployOrder) -> Vec<OrderedObject> {
    let positions = order.positions();

    order
        .order
        .iter()
        .filter(|name| !graph.paths(name).is_empty())
        .map(|name| {
            let mut dependencies: Vec<ObjectName> = graph.parents(name).into_iter().cloned().collect();
            dependencies.sort_by_key(|dep| positions.get(dep).copied().unwrap_or(usize::MAX));
            OrderedObject {
                name: name.clone(),
                paths: graph.paths(name).to_vec(),
                dependencies,
            }
        })
        .collect()
}

/// Renders the `show-dependencies` report
pub struct DependencyListing<'a> {
    objects: &'a [OrderedObject],
    upper_case: bool,
    ignore_prefixes: Vec<String>,
}

impl<'a> DependencyListing<'a> {
    pub fn new(objects: &'a [OrderedObject]) -> Self {
        Self {
            objects,
            upper_case: false,
            ignore_prefixes: Vec::new(),
        }
    }

    /// Print names in upper case (lower case by default)
    pub fn upper_case(mut self, upper_case: bool) -> Self {
        self.upper_case = upper_case;
        self
    }

    /// Comma-separated prefixes hidden from the unreferenced list
    pub fn ignore_prefixes(mut self, prefixes: &str) -> Self {
        self.ignore_prefixes = prefixes
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    fn display(&self, name: &ObjectName) -> String {
        if self.upper_case {
            name.to_string()
        } else {
            name.to_string().to_lowercase()
        }
    }

    /// Objects nobody depends on, in deploy order
    pub fn unreferenced(&self) -> Vec<&ObjectName> {
        let referenced: BTreeSet<&ObjectName> = self
            .objects
            .iter()
            .flat_map(|o| o.dependencies.iter())
            .collect();

        self.objects
            .iter()
            .map(|o| &o.name)
            .filter(|name| !referenced.contains(name))
            .filter(|name| {
                let shown = self.display(name);
                !self.ignore_prefixes.iter().any(|p| shown.starts_with(p.as_str()))
            })
            .collect()
    }

    /// Dependencies that no file defines, sorted
    pub fn unknown_dependencies(&self) -> BTreeSet<&ObjectName> {
        let defined: BTreeSet<&ObjectName> = self
            .objects
            .iter()
            .filter(|o| !o.paths.is_empty())
            .map(|o| &o.name)
            .collect();

        self.objects
            .iter()
            .flat_map(|o| o.dependencies.iter())
            .filter(|dep| !defined.contains(dep))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        for object in self.objects.iter().filter(|o| !o.dependencies.is_empty()) {
            let _ = writeln!(out, "{}:", self.display(&object.name));
            for dep in &object.dependencies {
                let _ = writeln!(out, "  - {}", self.display(dep));
            }
            out.push('\n');
        }

        out.push_str("Unreferenced objects:\n");
        for name in self.unreferenced() {
            let _ = writeln!(out, "  - {}", self.display(name));
        }

        let unknown = self.unknown_dependencies();
        if !unknown.is_empty() {
            out.push_str("\nReferenced dependencies with no known path:\n");
            for dep in unknown {
                let _ = writeln!(out, "  - {}", self.display(dep));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::schedule;
    use pretty_assertions::assert_eq;

    fn name(s: &str) -> ObjectName {
        ObjectName::parse(s).unwrap()
    }

    fn sample() -> Vec<OrderedObject> {
        let mut graph = DependencyGraph::new();
        for obj in ["s.v", "s.t", "tmp.scratch"] {
            graph.add_definition(name(obj), PathBuf::from(format!("{obj}.sql")));
        }
        graph.add_dependency(name("s.v"), name("s.t"));
        graph.add_dependency(name("s.v"), name("raw.events"));

        dependency_ordered_objects(&graph, &schedule(&graph))
    }

    #[test]
    fn ordered_objects_skip_undefined_nodes() {
        let objects = sample();
        let names: Vec<String> = objects.iter().map(|o| o.name.to_string()).collect();
        assert_eq!(names, vec!["S.T", "TMP.SCRATCH", "S.V"]);
        assert_eq!(objects[2].dependencies, vec![name("s.t"), name("raw.events")]);
    }

    #[test]
    fn listing_text() {
        let objects = sample();
        let text = DependencyListing::new(&objects).ignore_prefixes("tmp.").render();

        assert_eq!(
            text,
            "s.v:\n  - s.t\n  - raw.events\n\n\
             Unreferenced objects:\n  - s.v\n\n\
             Referenced dependencies with no known path:\n  - raw.events\n"
        );
    }

    #[test]
    fn upper_case_listing() {
        let objects = sample();
        let text = DependencyListing::new(&objects).upper_case(true).render();
        assert!(text.starts_with("S.V:\n  - S.T\n"));
        assert!(text.contains("  - TMP.SCRATCH\n"));
    }
}
