pub mod github;

pub use github::client::GitHubHost;
pub use github::mock::MockRepoHost;
pub use github::{CodeMatch, GitHubError, RepoHost};
