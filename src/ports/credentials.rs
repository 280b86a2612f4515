use std::sync::Arc;

use color_eyre::eyre::Result;

/// Port trait for whatever owns the OAuth tokens.
///
/// The sync engine only ever asks for the current token; re-authentication is
/// signalled through `mark_login_required` by the collaborators that observe 401/403.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current_access_token(&self) -> Result<String>;

    /// Force a token refresh. Returns `false` when no refresh was possible.
    async fn refresh(&self) -> Result<bool>;

    fn mark_login_required(&self);

    fn login_required(&self) -> bool;
}

#[async_trait::async_trait]
impl<T: CredentialProvider + ?Sized> CredentialProvider for Arc<T> {
    async fn current_access_token(&self) -> Result<String> {
        (**self).current_access_token().await
    }

    async fn refresh(&self) -> Result<bool> {
        (**self).refresh().await
    }

    fn mark_login_required(&self) {
        (**self).mark_login_required()
    }

    fn login_required(&self) -> bool {
        (**self).login_required()
    }
}
