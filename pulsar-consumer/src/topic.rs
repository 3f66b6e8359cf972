use crate::error::TopicError;

const PERSISTENT_SCHEME: &str = "persistent://";

/// Return the tenant segment of a topic, i.e. everything before the first `/` once the
/// `persistent://` scheme has been stripped.
pub fn tenant(topic: &str) -> Result<&str, TopicError> {
    let stripped = topic.strip_prefix(PERSISTENT_SCHEME).unwrap_or(topic);

    let Some((tenant, _)) = stripped.split_once('/') else {
        return Err(TopicError::MissingTenantSeparator(topic.to_owned()));
    };

    if tenant.is_empty() {
        return Err(TopicError::EmptyTenant(topic.to_owned()));
    }

    Ok(tenant)
}

/// Subscription name shared by every consumer of a topic. Keeping it stable is what lets
/// reconnecting consumers rejoin the same failover subscription.
pub fn subscription_name(topic: &str) -> Result<String, TopicError> {
    Ok(format!("{}-sub", tenant(topic)?))
}

/// Topic that events for an access id are published to.
pub fn topic_for_access_id(access_id: &str) -> String {
    format!("{PERSISTENT_SCHEME}{access_id}/out/event")
}

pub fn partition_topic(topic: &str, partition: u32) -> String {
    format!("{topic}-partition-{partition}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_from_persistent_topic() {
        assert_eq!(tenant("persistent://acme/out/event").unwrap(), "acme");
        assert_eq!(tenant("persistent://T/ns/name").unwrap(), "T");
    }

    #[test]
    fn test_tenant_without_scheme() {
        assert_eq!(tenant("acme/ns/name").unwrap(), "acme");
    }

    #[test]
    fn test_tenant_requires_separator() {
        let err = tenant("persistent://acme").unwrap_err();
        assert_eq!(
            err,
            TopicError::MissingTenantSeparator("persistent://acme".to_owned())
        );

        assert!(tenant("").is_err());
        assert!(tenant("persistent://").is_err());
    }

    #[test]
    fn test_tenant_must_not_be_empty() {
        let err = tenant("persistent:///ns/name").unwrap_err();
        assert_eq!(err, TopicError::EmptyTenant("persistent:///ns/name".to_owned()));
    }

    #[test]
    fn test_subscription_name() {
        assert_eq!(
            subscription_name("persistent://T/ns/name").unwrap(),
            "T-sub".to_owned()
        );
        // Same topic, same subscription.
        assert_eq!(
            subscription_name("persistent://T/ns/name").unwrap(),
            subscription_name("persistent://T/ns/name").unwrap()
        );
        assert!(subscription_name("no-separator").is_err());
    }

    #[test]
    fn test_topic_for_access_id() {
        assert_eq!(topic_for_access_id("abc"), "persistent://abc/out/event");
        assert_eq!(tenant(&topic_for_access_id("abc")).unwrap(), "abc");
    }

    #[test]
    fn test_partition_topic() {
        assert_eq!(
            partition_topic("persistent://abc/out/event", 2),
            "persistent://abc/out/event-partition-2"
        );
    }
}
