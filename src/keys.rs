pub const OVERVIEW_PREFIX: &str = "overview_state_";
pub const OVERVIEW_PATTERN: &str = "overview_state_*";

const DETAIL_SUFFIX: &str = "_state";
pub const DETAIL_PATTERN: &str = "*_state";

const TASK_PREFIX: &str = "rebuild_";
const TASK_SUFFIX: &str = "_task_id";
pub const DETAIL_TASK_PATTERN: &str = "rebuild_*_state_task_id";

pub fn overview_key(owner: &str) -> String {
    format!("{OVERVIEW_PREFIX}{owner}")
}

pub fn detail_key(uuid: &str) -> String {
    format!("{uuid}{DETAIL_SUFFIX}")
}

pub fn rebuild_task_key(target_key: &str) -> String {
    format!("{TASK_PREFIX}{target_key}{TASK_SUFFIX}")
}

pub fn owner_from_overview_key(key: &str) -> Option<&str> {
    key.strip_prefix(OVERVIEW_PREFIX).filter(|owner| !owner.is_empty())
}

pub fn is_overview_key(key: &str) -> bool {
    owner_from_overview_key(key).is_some()
}

pub fn is_task_key(key: &str) -> bool {
    key.starts_with(TASK_PREFIX) && key.ends_with(TASK_SUFFIX)
}

pub fn is_detail_key(key: &str) -> bool {
    key.ends_with(DETAIL_SUFFIX) && !is_overview_key(key) && !is_task_key(key) && key.len() > DETAIL_SUFFIX.len()
}

pub fn target_from_task_key(key: &str) -> Option<&str> {
    key.strip_prefix(TASK_PREFIX)?.strip_suffix(TASK_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(overview_key("42"), "overview_state_42");
        assert_eq!(detail_key("abc"), "abc_state");
        assert_eq!(
            rebuild_task_key(&overview_key("42")),
            "rebuild_overview_state_42_task_id"
        );
    }

    #[test]
    fn classifies_keys() {
        assert!(is_detail_key("abc_state"));
        assert!(!is_detail_key("overview_state_42"));
        assert!(!is_detail_key("_state"));
        assert!(is_task_key("rebuild_abc_state_task_id"));
        assert_eq!(owner_from_overview_key("overview_state_42"), Some("42"));
        assert_eq!(owner_from_overview_key("overview_state_"), None);
        assert_eq!(
            target_from_task_key("rebuild_abc_state_task_id"),
            Some("abc_state")
        );
    }
}
