use async_trait::async_trait;
use url::Url;

use crate::domain::{
    errors::DriveError, repositories::token_provider::TokenProvider,
    value_objects::bearer_token::BearerToken,
};

use super::responses::interpret_token;

pub const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Clone)]
pub struct ClientCredentialsConfig {
    pub login_base_url: Url,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

/// OAuth2 client-credentials grant against the Microsoft identity platform.
pub struct ClientCredentialsTokenProvider {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientCredentialsTokenProvider {
    pub fn new(client: reqwest::Client, config: ClientCredentialsConfig) -> Result<Self, DriveError> {
        let token_url = token_url(&config.login_base_url, &config.tenant_id)?;

        Ok(Self {
            client,
            token_url,
            client_id: config.client_id,
            client_secret: config.client_secret,
            scope: config.scope,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn exchange(&self) -> Result<BearerToken, DriveError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| DriveError::Auth(format!("token request failed: {err}")))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let token = interpret_token(status, &body)?;

        Ok(BearerToken::from_expires_in(token.access_token, token.expires_in))
    }
}

fn token_url(login_base_url: &Url, tenant_id: &str) -> Result<Url, DriveError> {
    let mut url = login_base_url.clone();
    url.path_segments_mut()
        .map_err(|_| DriveError::Auth(format!("invalid login base url: {login_base_url}")))?
        .pop_if_empty()
        .extend([tenant_id, "oauth2", "v2.0", "token"]);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_targets_tenant_v2_endpoint() {
        let base = Url::parse(DEFAULT_LOGIN_BASE_URL).expect("base url");
        let url = token_url(&base, "contoso-tenant").expect("token url");
        assert_eq!(
            url.as_str(),
            "https://login.microsoftonline.com/contoso-tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn token_url_tolerates_trailing_slash() {
        let base = Url::parse("https://login.example.test/").expect("base url");
        let url = token_url(&base, "t1").expect("token url");
        assert_eq!(url.as_str(), "https://login.example.test/t1/oauth2/v2.0/token");
    }
}
