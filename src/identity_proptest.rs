//! Property-based tests for identity canonicalization and resolution.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all of them.

#[cfg(test)]
mod proptest_tests {
    use crate::identity::{RepositoryIdentity, Requester};
    use crate::manifest;
    use crate::phases::discovery::{discover, DiscoveryOptions};
    use crate::phases::layout::WorkspaceLayout;
    use crate::phases::resolution::{resolve, ResolutionOptions};
    use crate::phases::worker_pool;
    use crate::repository::memory::InMemoryRepositories;
    use proptest::prelude::*;
    use std::path::Path;

    // ============================================================================
    // RepositoryIdentity property tests
    // ============================================================================

    proptest! {
        /// Property: every spelling of a remote repository has the same key
        #[test]
        fn spellings_share_one_key(
            host in "[a-z][a-z0-9]{0,10}\\.(com|org|io)",
            owner in "[a-z][a-z0-9_-]{0,10}",
            name in "[a-z][a-z0-9_-]{0,10}",
        ) {
            let https = RepositoryIdentity::parse(&format!("https://{}/{}/{}.git", host, owner, name)).unwrap();
            let upper = RepositoryIdentity::parse(&format!("https://{}/{}/{}/", host.to_uppercase(), owner, name)).unwrap();
            let ssh = RepositoryIdentity::parse(&format!("ssh://git@{}:22/{}/{}", host, owner, name)).unwrap();
            let scp = RepositoryIdentity::parse(&format!("git@{}:{}/{}.git", host, owner, name)).unwrap();

            prop_assert_eq!(&https, &upper);
            prop_assert_eq!(&https, &ssh);
            prop_assert_eq!(&https, &scp);
            prop_assert_eq!(https.key(), format!("{}/{}/{}", host, owner, name));
            prop_assert_eq!(https.name(), name.as_str());
        }

        /// Property: canonicalization is idempotent
        #[test]
        fn canonical_key_reparses_to_itself(
            host in "[a-z]{1,8}\\.com",
            path in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
        ) {
            let identity = RepositoryIdentity::parse(&format!("https://{}/{}", host, path)).unwrap();
            let again = RepositoryIdentity::parse(&format!("https://{}", identity.key())).unwrap();
            prop_assert_eq!(identity.key(), again.key());
        }

        /// Property: parsing never panics
        #[test]
        fn parse_never_panics(input in ".*") {
            let _ = RepositoryIdentity::parse(&input);
        }
    }

    // ============================================================================
    // Resolution determinism
    // ============================================================================

    /// Builds a layered graph: the root requires every repository of layer 0,
    /// and repository `i` of layer `l` requires the repositories of layer
    /// `l + 1` selected by `links`.
    fn layered(layers: usize, width: usize, links: &[bool]) -> (InMemoryRepositories, String) {
        let repos = InMemoryRepositories::new();
        let url = |layer: usize, index: usize| format!("https://github.com/acme/l{}r{}", layer, index);
        let mut link = links.iter().cycle();

        for layer in 0..layers {
            for index in 0..width {
                let mut manifest = String::new();
                if layer + 1 < layers {
                    for target in 0..width {
                        if *link.next().unwrap_or(&false) {
                            manifest.push_str(&format!("{} main\n", url(layer + 1, target)));
                        }
                    }
                }
                let repo = url(layer, index);
                repos
                    .add_commit(&repo, "c1", &[], &[(".gitdeps", manifest.as_str())])
                    .unwrap();
                repos.set_ref(&repo, "main", "c1").unwrap();
            }
        }

        let root = (0..width)
            .map(|index| format!("{} main\n", url(0, index)))
            .collect::<String>();
        (repos, root)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Property: two runs over the same input resolve and lay out identically
        #[test]
        fn resolution_is_deterministic(
            layers in 1usize..4,
            width in 1usize..4,
            links in proptest::collection::vec(any::<bool>(), 1..16),
            jobs in 1usize..4,
        ) {
            let (repos, root_text) = layered(layers, width, &links);
            let root = manifest::parse(&root_text, &Requester::Root).unwrap();
            let pool = worker_pool(jobs).unwrap();

            let mut results = Vec::new();
            for _ in 0..2 {
                let raw = discover(&root, None, &repos, &pool, &DiscoveryOptions::default());
                prop_assert!(raw.errors.is_empty());
                let resolution = resolve(&raw, &repos, &ResolutionOptions::default()).unwrap();
                let layout = WorkspaceLayout::build(Path::new("/ws"), &resolution).unwrap();
                results.push((raw.edges, resolution.repositories, layout));
            }
            prop_assert_eq!(&results[0], &results[1]);
        }
    }
}
