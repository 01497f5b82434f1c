//! Shared AWS SDK configuration.

use crate::config::AwsConfig;
use tracing::debug;

/// Build an SDK config for `aws`, shared by the Kinesis and DynamoDB clients.
///
/// Explicit keys win; otherwise the default credential chain (env vars,
/// profile, IAM role) is used.
pub(crate) async fn build_sdk_config(aws: &AwsConfig) -> aws_config::SdkConfig {
    let region = aws_config::Region::new(aws.region.clone());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let (Some(access_key), Some(secret_key)) = (&aws.access_key_id, &aws.secret_access_key) {
        debug!("Using explicit AWS credentials");
        let credentials = aws_credential_types::Credentials::new(
            access_key,
            secret_key,
            None, // session token
            None, // expiry
            "kstream-explicit-credentials",
        );
        loader = loader.credentials_provider(credentials);
    } else {
        debug!("Using default AWS credential chain");
    }

    if let Some(endpoint) = &aws.endpoint_url {
        debug!(endpoint = %endpoint, "Using AWS endpoint override");
        loader = loader.endpoint_url(endpoint);
    }

    loader.load().await
}
