//! Special-group merger.
//!
//! Benchmark families such as MMLU are evaluated as dozens of subtasks
//! (`lighteval|mmlu:us_history|5`, `lighteval|mmlu:virology|5`, ...). For
//! each configured family, every subtask config is additionally folded into
//! one combined config per shot setting (`lighteval_mmlu_5`), so a whole
//! run of the family can be loaded as a single split.

use indexmap::IndexMap;
use tracing::debug;

use evalcard_shared::{EvalCardError, Result, SplitEntry};

use crate::builder::{SplitMap, TaskConfigs, extend_split, into_entries, slugify};

/// A benchmark family, written `namespace|task` (e.g. `lighteval|mmlu`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    namespace: String,
    task: String,
}

impl GroupSpec {
    /// Parse a `namespace|task` family prefix.
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split('|').collect::<Vec<_>>().as_slice() {
            [namespace, task] if !namespace.is_empty() && !task.is_empty() => Ok(Self {
                namespace: namespace.to_string(),
                task: task.to_string(),
            }),
            _ => Err(EvalCardError::config(format!(
                "special group '{spec}' must be written as 'namespace|task'"
            ))),
        }
    }

    /// Parse a list of family prefixes.
    pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> Result<Vec<Self>> {
        specs.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    /// Config name prefix of the family (`lighteval_mmlu`).
    pub fn slug(&self) -> String {
        slugify(&format!("{}|{}", self.namespace, self.task))
    }

    /// Group config a task belongs to, or `None` when it is not a subtask of
    /// this family.
    ///
    /// Membership requires the namespace to match exactly and the task
    /// segment to be `<task>:<subtask>`, or exactly `<task>` in the
    /// four-segment form `namespace|task|subtask|shots`. The group is
    /// suffixed with every segment after the task segment.
    pub fn group_id(&self, task_id: &str) -> Option<String> {
        let segments: Vec<&str> = task_id.split('|').collect();
        if !(3..=4).contains(&segments.len()) || segments[0] != self.namespace {
            return None;
        }

        let member = match segments[1].strip_prefix(self.task.as_str())? {
            "" => segments.len() == 4,
            rest => rest.strip_prefix(':').is_some_and(|sub| !sub.is_empty()),
        };
        if !member {
            return None;
        }

        let suffix = segments[2..].join("_");
        Some(format!("{}_{}", self.slug(), slugify(&suffix)))
    }
}

/// Fold member task configs into one config per group.
///
/// Splits with the same name are concatenated, never overwritten. Members
/// are visited in config-name order, so the result does not depend on the
/// order in which they were built.
pub fn merge(task_configs: &TaskConfigs, specs: &[GroupSpec]) -> IndexMap<String, Vec<SplitEntry>> {
    let mut groups: IndexMap<String, SplitMap> = IndexMap::new();

    for (config_name, task_id) in &task_configs.task_ids {
        let Some(splits) = task_configs.config.get(config_name) else {
            continue;
        };

        for spec in specs {
            let Some(group_id) = spec.group_id(task_id) else {
                continue;
            };
            debug!(%task_id, group = %group_id, "merging task into special group");

            let group = groups.entry(group_id).or_default();
            for entry in splits {
                extend_split(group, &entry.split, &entry.path);
            }
        }
    }

    groups.sort_keys();
    groups
        .into_iter()
        .map(|(group_id, mut splits)| {
            splits.sort_keys();
            (group_id, into_entries(splits))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalcard_shared::LATEST_SPLIT;

    fn mmlu() -> GroupSpec {
        GroupSpec::parse("lighteval|mmlu").expect("spec")
    }

    /// Add one path to a split of a task config.
    fn add(configs: &mut TaskConfigs, task_id: &str, split: &str, path: &str) {
        let name = slugify(task_id);
        configs.task_ids.insert(name.clone(), task_id.to_string());
        let splits = configs.config.configs.entry(name).or_default();
        match splits.iter_mut().find(|s| s.split == split) {
            Some(entry) => entry.path.push(path.to_string()),
            None => splits.push(SplitEntry {
                split: split.to_string(),
                path: vec![path.to_string()],
            }),
        }
    }

    #[test]
    fn group_spec_parsing() {
        assert_eq!(mmlu().slug(), "lighteval_mmlu");
        assert!(GroupSpec::parse("mmlu").is_err());
        assert!(GroupSpec::parse("a|b|c").is_err());
        assert!(GroupSpec::parse("|mmlu").is_err());
        assert_eq!(GroupSpec::parse_all(&["a|b", "c|d"]).unwrap().len(), 2);
    }

    #[test]
    fn membership_is_an_explicit_prefix_match() {
        let spec = mmlu();
        assert_eq!(
            spec.group_id("lighteval|mmlu:us_history|5").as_deref(),
            Some("lighteval_mmlu_5")
        );
        assert_eq!(
            spec.group_id("lighteval|mmlu:us_history|5|0").as_deref(),
            Some("lighteval_mmlu_5_0")
        );
        assert_eq!(
            spec.group_id("lighteval|mmlu|law|5").as_deref(),
            Some("lighteval_mmlu_law_5")
        );
        // Substring lookalikes stay out.
        assert_eq!(spec.group_id("lighteval|mmlu_pro:law|5"), None);
        assert_eq!(spec.group_id("other_lighteval|mmlu:law|5"), None);
        assert_eq!(spec.group_id("lighteval|mmlu|5"), None);
        assert_eq!(spec.group_id("lighteval|mmlu:|5"), None);
        assert_eq!(spec.group_id("lighteval|mmlu:law"), None);
    }

    #[test]
    fn same_split_paths_are_concatenated() {
        let mut configs = TaskConfigs::default();
        for (task, path) in [
            ("lighteval|mmlu:us_history|5", "**/a"),
            ("lighteval|mmlu:world_religions|5", "**/b"),
        ] {
            add(&mut configs, task, "2024-01-01T00_00_00", path);
            add(&mut configs, task, LATEST_SPLIT, path);
        }
        add(&mut configs, "lighteval|arc:challenge|25", "2024-01-01T00_00_00", "**/c");

        let groups = merge(&configs, &[mmlu()]);

        assert_eq!(groups.len(), 1);
        let splits = &groups["lighteval_mmlu_5"];
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].split, "2024-01-01T00_00_00");
        assert_eq!(splits[0].path, vec!["**/a", "**/b"]);
        assert_eq!(splits[1].split, LATEST_SPLIT);
        assert_eq!(splits[1].path, vec!["**/a", "**/b"]);
    }

    #[test]
    fn shot_settings_get_separate_groups() {
        let mut configs = TaskConfigs::default();
        add(&mut configs, "lighteval|mmlu:law|5", "2024-01-01T00_00_00", "**/five");
        add(&mut configs, "lighteval|mmlu:law|0", "2024-01-01T00_00_00", "**/zero");

        let groups = merge(&configs, &[mmlu()]);
        let names: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["lighteval_mmlu_0", "lighteval_mmlu_5"]);
    }

    #[test]
    fn merge_is_order_independent() {
        let members = [
            ("lighteval|mmlu:a|5", "2024-02-01T00_00_00", "**/a2"),
            ("lighteval|mmlu:a|5", "2024-01-01T00_00_00", "**/a1"),
            ("lighteval|mmlu:b|5", "2024-01-01T00_00_00", "**/b1"),
            ("lighteval|mmlu:c|5", "2024-03-01T00_00_00", "**/c3"),
        ];

        let mut forward = TaskConfigs::default();
        for (task, split, path) in members {
            add(&mut forward, task, split, path);
        }
        let mut backward = TaskConfigs::default();
        for (task, split, path) in members.into_iter().rev() {
            add(&mut backward, task, split, path);
        }

        let forward = merge(&forward, &[mmlu()]);
        let backward = merge(&backward, &[mmlu()]);
        assert_eq!(forward, backward);

        let splits: Vec<&str> = forward["lighteval_mmlu_5"]
            .iter()
            .map(|s| s.split.as_str())
            .collect();
        assert_eq!(
            splits,
            vec!["2024-01-01T00_00_00", "2024-02-01T00_00_00", "2024-03-01T00_00_00"]
        );
        assert_eq!(forward["lighteval_mmlu_5"][0].path, vec!["**/a1", "**/b1"]);
    }

    #[test]
    fn no_members_means_no_groups() {
        let mut configs = TaskConfigs::default();
        add(&mut configs, "lighteval|arc:challenge|25", "2024-01-01T00_00_00", "**/c");
        assert!(merge(&configs, &[mmlu()]).is_empty());
        assert!(merge(&TaskConfigs::default(), &[mmlu()]).is_empty());
    }
}
