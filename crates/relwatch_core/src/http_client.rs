use std::time::Duration;

/// Client builder using the relwatch user agent, used to identify
/// relwatch to external http servers, such as GitHub and GitLab.
pub fn http_client_builder() -> reqwest::ClientBuilder {
    let user_agent = format!("relwatch/{}", env!("CARGO_PKG_VERSION"));
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(10))
}
