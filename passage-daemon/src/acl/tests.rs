use super::*;
use crate::config::{AclGroup, AclRole, AclRule, AclUser};

fn base_config() -> AclConfig {
    let mut config = AclConfig {
        enabled: true,
        ..Default::default()
    };
    config.users.insert(
        "alice".into(),
        AclUser {
            roles: vec!["operator".into()],
            token: "T".into(),
            ..Default::default()
        },
    );
    config.users.insert(
        "bob".into(),
        AclUser {
            token: "B".into(),
            ..Default::default()
        },
    );
    config.groups.insert(
        "admins".into(),
        AclGroup {
            members: vec!["alice".into()],
            roles: vec!["admin".into()],
            ..Default::default()
        },
    );
    config.roles.insert(
        "operator".into(),
        AclRole {
            permissions: vec!["proxy_list".into()],
            ..Default::default()
        },
    );
    config.roles.insert(
        "admin".into(),
        AclRole {
            permissions: vec!["proxy_start".into(), "proxy_stop".into()],
            ..Default::default()
        },
    );
    config
}

fn engine() -> AclEngine {
    AclEngine::new(&base_config(), PERMISSIONS).unwrap()
}

fn rules(list: Vec<AclRule>) -> AclRuleSet {
    AclRuleSet { rules: list }
}

#[test]
fn init_rejects_unknown_permission() {
    let mut config = base_config();
    config.roles.insert(
        "broken".into(),
        AclRole {
            permissions: vec!["proxy_fly".into()],
            ..Default::default()
        },
    );
    let err = AclEngine::new(&config, PERMISSIONS).unwrap_err();
    assert!(matches!(err, DaemonError::InvalidPermission { .. }));
}

#[test]
fn init_rejects_unknown_group_member() {
    let mut config = base_config();
    config.groups.insert(
        "ghosts".into(),
        AclGroup {
            members: vec!["casper".into()],
            ..Default::default()
        },
    );
    let err = AclEngine::new(&config, PERMISSIONS).unwrap_err();
    assert!(matches!(err, DaemonError::UnknownGroupMember { .. }));
}

#[test]
fn explicit_group_name_overrides_key() {
    let mut config = base_config();
    config.groups.insert(
        "g-key".into(),
        AclGroup {
            name: "g-name".into(),
            members: vec!["bob".into()],
            roles: vec!["admin".into()],
            ..Default::default()
        },
    );
    let engine = AclEngine::new(&config, PERMISSIONS).unwrap();

    // bob gains admin through the renamed group, and rule subjects match the
    // explicit name, not the key.
    assert!(engine.can("bob", "proxy_start", &AclRuleSet::default()));
    let rs = rules(vec![AclRule {
        subjects: vec!["g-name".into()],
        ..Default::default()
    }]);
    assert!(engine.can("bob", "proxy_start", &rs));
}

#[test]
fn authenticate_checks_token() {
    let engine = engine();
    let good = Auth {
        user: "alice".into(),
        token: "T".into(),
    };
    let bad = Auth {
        user: "alice".into(),
        token: "bad".into(),
    };
    let unknown = Auth {
        user: "mallory".into(),
        token: "T".into(),
    };
    assert!(engine.authenticate(Some(&good)));
    assert!(!engine.authenticate(Some(&bad)));
    assert!(!engine.authenticate(Some(&unknown)));
    assert!(!engine.authenticate(None));
}

#[test]
fn disabled_engine_allows_everything() {
    let mut config = base_config();
    config.enabled = false;
    let engine = AclEngine::new(&config, PERMISSIONS).unwrap();

    assert!(engine.authenticate(None));
    assert!(engine.can("whoever", "proxy_start", &AclRuleSet::default()));
}

#[test]
fn role_gate_denies_without_grant() {
    let engine = engine();
    // bob has no roles at all
    assert!(!engine.can("bob", "proxy_list", &AclRuleSet::default()));
    // alice's operator role grants list but not setactive
    assert!(engine.can("alice", "proxy_list", &AclRuleSet::default()));
    assert!(!engine.can("alice", "proxy_setactive", &AclRuleSet::default()));
}

#[test]
fn group_roles_count_toward_the_gate() {
    let engine = engine();
    // proxy_start comes via admins → admin role
    assert!(engine.can("alice", "proxy_start", &AclRuleSet::default()));
}

#[test]
fn unknown_user_is_denied() {
    let engine = engine();
    assert!(!engine.can("mallory", "proxy_list", &AclRuleSet::default()));
}

#[test]
fn empty_rule_set_is_permission_only() {
    let engine = engine();
    assert!(engine.can("alice", "proxy_stop", &AclRuleSet::default()));
}

#[test]
fn deny_beats_allow() {
    let engine = engine();
    // Mirrors the documented precedence scenario: the group allow matches,
    // the user-specific deny still wins.
    let rs = rules(vec![
        AclRule {
            subjects: vec!["admins".into()],
            permissions: vec!["proxy_start".into()],
            deny: false,
            ..Default::default()
        },
        AclRule {
            subjects: vec!["alice".into()],
            permissions: vec!["proxy_start".into()],
            deny: true,
            ..Default::default()
        },
    ]);
    assert!(!engine.can("alice", "proxy_start", &rs));
}

#[test]
fn deny_wins_regardless_of_order() {
    let engine = engine();
    let rs = rules(vec![
        AclRule {
            subjects: vec!["alice".into()],
            deny: true,
            ..Default::default()
        },
        AclRule {
            subjects: vec!["admins".into()],
            ..Default::default()
        },
    ]);
    assert!(!engine.can("alice", "proxy_start", &rs));
}

#[test]
fn no_applicable_rule_denies() {
    let engine = engine();
    let rs = rules(vec![AclRule {
        subjects: vec!["someone-else".into()],
        ..Default::default()
    }]);
    assert!(!engine.can("alice", "proxy_start", &rs));
}

#[test]
fn empty_subjects_never_match() {
    let engine = engine();
    let rs = rules(vec![AclRule {
        subjects: vec![],
        ..Default::default()
    }]);
    assert!(!engine.can("alice", "proxy_start", &rs));
}

#[test]
fn empty_permission_filter_matches_all() {
    let engine = engine();
    let rs = rules(vec![AclRule {
        subjects: vec!["admins".into()],
        permissions: vec![],
        ..Default::default()
    }]);
    assert!(engine.can("alice", "proxy_start", &rs));
}

#[test]
fn permission_filter_excludes_other_commands() {
    let engine = engine();
    // Rule only covers proxy_stop; a start check finds no applicable rule.
    let rs = rules(vec![AclRule {
        subjects: vec!["alice".into()],
        permissions: vec!["proxy_stop".into()],
        ..Default::default()
    }]);
    assert!(!engine.can("alice", "proxy_start", &rs));
    assert!(engine.can("alice", "proxy_stop", &rs));
}

#[test]
fn gate_failure_short_circuits_rules() {
    let engine = engine();
    // An allow rule cannot grant a permission no role grants.
    let rs = rules(vec![AclRule {
        subjects: vec!["bob".into()],
        ..Default::default()
    }]);
    assert!(!engine.can("bob", "proxy_start", &rs));
}
