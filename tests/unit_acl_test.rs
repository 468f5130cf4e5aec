use feedgate::core::acl::{
    Acl, AuthnIdentity, AuthzStatus, CaseSensitivity, DomainFormat, InheritanceType, Principal,
};
use feedgate::core::docid::DocId;

fn identity_with_group(user: &str, group: &str) -> AuthnIdentity {
    AuthnIdentity::for_user(Principal::user(user)).with_groups([Principal::group(group)])
}

#[test]
fn test_node_deny_wins_over_permit() {
    let acl = Acl::builder()
        .permit_user(Principal::user("u"))
        .deny_user(Principal::user("u"))
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(acl.decide(&identity), AuthzStatus::Deny);
}

#[test]
fn test_node_unlisted_identity_is_indeterminate() {
    let acl = Acl::builder().permit_user(Principal::user("alice")).build();
    let identity = AuthnIdentity::for_user(Principal::user("bob"));
    assert_eq!(acl.decide(&identity), AuthzStatus::Indeterminate);
}

#[test]
fn test_group_membership_permits() {
    let acl = Acl::builder().permit_group(Principal::group("g1")).build();
    assert_eq!(
        acl.decide(&identity_with_group("u", "g1")),
        AuthzStatus::Permit
    );
    assert_eq!(
        acl.decide(&identity_with_group("u", "g2")),
        AuthzStatus::Indeterminate
    );
}

#[test]
fn test_and_both_permit_chain() {
    let root = Acl::builder()
        .permit_group(Principal::group("g1"))
        .inheritance_type(InheritanceType::AndBothPermit)
        .build();
    let leaf = Acl::builder()
        .permit_group(Principal::group("g1"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let chain = [root, leaf];

    assert_eq!(
        Acl::evaluate_chain(&chain, &identity_with_group("u", "g1")),
        AuthzStatus::Permit
    );
    let no_groups = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&chain, &no_groups),
        AuthzStatus::Indeterminate
    );
}

#[test]
fn test_parent_overrides_chain() {
    let root = Acl::builder()
        .deny_user(Principal::user("u"))
        .inheritance_type(InheritanceType::ParentOverrides)
        .build();
    let leaf = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&[root, leaf], &identity),
        AuthzStatus::Deny
    );
}

#[test]
fn test_parent_overrides_falls_through_when_indeterminate() {
    let root = Acl::builder()
        .permit_user(Principal::user("somebody-else"))
        .inheritance_type(InheritanceType::ParentOverrides)
        .build();
    let leaf = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&[root, leaf], &identity),
        AuthzStatus::Permit
    );
}

#[test]
fn test_child_overrides_chain() {
    let root = Acl::builder()
        .deny_user(Principal::user("u"))
        .inheritance_type(InheritanceType::ChildOverrides)
        .build();
    let leaf = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&[root, leaf], &identity),
        AuthzStatus::Permit
    );
}

#[test]
fn test_three_level_chain_evaluates_right_to_left() {
    let root = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::AndBothPermit)
        .build();
    let middle = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::AndBothPermit)
        .build();
    let leaf = Acl::builder()
        .deny_user(Principal::user("u"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&[root, middle, leaf], &identity),
        AuthzStatus::Deny
    );
}

#[test]
fn test_empty_chain_is_indeterminate() {
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(Acl::evaluate_chain(&[], &identity), AuthzStatus::Indeterminate);
}

#[test]
fn test_interior_leaf_node_breaks_chain() {
    let root = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let leaf = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&[root, leaf], &identity),
        AuthzStatus::Indeterminate
    );
}

#[test]
fn test_overlong_chain_is_indeterminate() {
    let node = Acl::builder()
        .permit_user(Principal::user("u"))
        .inheritance_type(InheritanceType::ChildOverrides)
        .build();
    let chain: Vec<Acl> = std::iter::repeat_with(|| node.clone()).take(60).collect();
    let identity = AuthnIdentity::for_user(Principal::user("u"));
    assert_eq!(
        Acl::evaluate_chain(&chain, &identity),
        AuthzStatus::Indeterminate
    );
}

#[test]
fn test_evaluation_is_idempotent() {
    let root = Acl::builder()
        .permit_group(Principal::group("g1"))
        .inheritance_type(InheritanceType::AndBothPermit)
        .build();
    let leaf = Acl::builder()
        .permit_group(Principal::group("g1"))
        .inheritance_type(InheritanceType::LeafNode)
        .build();
    let chain = [root, leaf];
    let identity = identity_with_group("u", "g1");
    let first = Acl::evaluate_chain(&chain, &identity);
    let second = Acl::evaluate_chain(&chain, &identity);
    assert_eq!(first, second);
}

#[test]
fn test_case_insensitive_matching() {
    let acl = Acl::builder()
        .permit_user(Principal::user("Alice"))
        .case_sensitivity(CaseSensitivity::Insensitive)
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("aLiCe"));
    assert_eq!(acl.decide(&identity), AuthzStatus::Permit);

    let sensitive = Acl::builder()
        .permit_user(Principal::user("Alice"))
        .case_sensitivity(CaseSensitivity::Sensitive)
        .build();
    assert_eq!(sensitive.decide(&identity), AuthzStatus::Indeterminate);
}

#[test]
fn test_domain_forms_match_across_spellings() {
    // domain\user and user@domain are the same principal.
    let acl = Acl::builder()
        .permit_user(Principal::user("corp\\fred"))
        .build();
    let identity = AuthnIdentity::for_user(Principal::user("fred@corp"));
    assert_eq!(acl.decide(&identity), AuthzStatus::Permit);
}

#[test]
fn test_namespaces_partition_principals() {
    let acl = Acl::builder()
        .permit_user(Principal::user_in("fred", "ns1"))
        .build();
    let identity = AuthnIdentity::for_user(Principal::user_in("fred", "ns2"));
    assert_eq!(acl.decide(&identity), AuthzStatus::Indeterminate);
}

#[test]
fn test_domain_format_rendering() {
    let p = Principal::user("fred@corp.example");
    assert_eq!(p.format_name(DomainFormat::Dns), "fred@corp.example");
    assert_eq!(p.format_name(DomainFormat::Netbios), "corp.example\\fred");
    assert_eq!(
        p.format_name(DomainFormat::NetbiosForwardslash),
        "corp.example/fred"
    );
    assert_eq!(p.format_name(DomainFormat::None), "fred");
}

#[test]
fn test_inherit_from_recorded() {
    let acl = Acl::builder()
        .inherit_from_fragment(DocId::new("parent"), "frag")
        .inheritance_type(InheritanceType::ChildOverrides)
        .build();
    let inherit = acl.inherit_from().unwrap();
    assert_eq!(inherit.doc_id, DocId::new("parent"));
    assert_eq!(inherit.fragment.as_deref(), Some("frag"));
}
