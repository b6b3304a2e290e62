//! 📣 Publish mode: tell the world one build is ready, then leave.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app_config::PublishRequest;
use crate::backends::{BusBackend, MessageBus};
use crate::correlator::{BUILD_ID_KEY, PARENT_UID_KEY, SHOULD_POLL_KEY};
use crate::error::FlowError;

/// 🏷️ The attributes a publish carries. The build id must be positive; the
/// parent uid only rides along when set; the polling hint is always spelled out.
pub fn publish_attributes(request: &PublishRequest) -> Result<BTreeMap<String, String>, FlowError> {
    if request.build_id <= 0 {
        return Err(FlowError::input(format!("build_id must be positive, got {}", request.build_id)));
    }
    let mut attributes = BTreeMap::new();
    attributes.insert(BUILD_ID_KEY.to_string(), request.build_id.to_string());
    if !request.parent_uid.is_empty() {
        attributes.insert(PARENT_UID_KEY.to_string(), request.parent_uid.clone());
    }
    attributes.insert(
        SHOULD_POLL_KEY.to_string(),
        request.should_poll_for_completion.to_string(),
    );
    Ok(attributes)
}

/// 🚀 Send the one message. The bus honours `cancel` for the whole call.
pub async fn publish(bus: &BusBackend, cancel: &CancellationToken, request: &PublishRequest) -> Result<()> {
    let attributes = publish_attributes(request)?;
    bus.publish(cancel, attributes)
        .await
        .with_context(|| format!("publishing build {} to {}", request.build_id, request.topic.topic))?;
    info!(build_id = request.build_id, topic = %request.topic.topic, "📣 published");
    bus.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::TopicConfig;
    use crate::backends::InMemoryBus;

    fn request(build_id: i64) -> PublishRequest {
        PublishRequest {
            topic: TopicConfig {
                project: "p".into(),
                topic: "t".into(),
            },
            build_id,
            ..PublishRequest::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_a_build_id_goes_out_with_its_hint() -> Result<()> {
        let bus = InMemoryBus::new(1);
        let mut req = request(8878535213888021808);
        req.parent_uid = "TestPlanRuns/1/foo".into();
        publish(&BusBackend::InMemory(bus.clone()), &CancellationToken::new(), &req).await?;

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0][BUILD_ID_KEY], "8878535213888021808");
        assert_eq!(published[0][PARENT_UID_KEY], "TestPlanRuns/1/foo");
        assert_eq!(published[0][SHOULD_POLL_KEY], "false");
        Ok(())
    }

    #[test]
    fn the_one_where_zero_is_not_a_build() {
        assert!(matches!(publish_attributes(&request(0)), Err(FlowError::Input(_))));
        // 🙅 the pipes would never ack a negative id, so don't send one
        assert!(matches!(publish_attributes(&request(-3)), Err(FlowError::Input(_))));
    }

    #[test]
    fn the_one_where_an_absent_parent_stays_absent() -> Result<()> {
        let mut req = request(42);
        req.should_poll_for_completion = true;
        let attributes = publish_attributes(&req)?;
        assert!(!attributes.contains_key(PARENT_UID_KEY));
        assert_eq!(attributes[SHOULD_POLL_KEY], "true");
        assert_eq!(attributes[BUILD_ID_KEY], "42");
        Ok(())
    }
}
