//! 📦 Common data structures: the things that ride the bus and the things they get
//! paired with.
//!
//! 🎬 COLD OPEN. INT. SUBSCRIPTION. A message arrives carrying nothing but a build id
//! and a receipt. It doesn't know the build. The build doesn't know it. By the end of
//! the pass they'll be a [`BuildWithMeta`], and the receipt will either be handed back
//! (acked) or kept for next time. 🦆

use std::collections::BTreeMap;

use crate::schema::Build;

/// ✉️ One message pulled off the bus.
///
/// `ack_id` is the receipt: it is the message's identity for acknowledgement and
/// nothing else. Attributes carry the build id and the optional linkage/hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub ack_id: String,
    pub attributes: BTreeMap<String, String>,
    /// 📜 opaque body, already base64-decoded. Usually empty.
    pub data: Vec<u8>,
}

impl Message {
    /// 🧪 Convenience for tests and in-memory buses.
    pub fn with_attributes<I, K, V>(ack_id: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            ack_id: ack_id.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            data: Vec::new(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// 🤝 A fetched build and the message that announced it.
#[derive(Debug, Clone)]
pub struct BuildWithMeta {
    pub build: Build,
    pub message: Message,
}

impl BuildWithMeta {
    pub fn parent_uid(&self) -> String {
        crate::correlator::parent_id_of(&self.message)
    }

    pub fn should_poll_for_completion(&self) -> bool {
        crate::correlator::should_poll_for_completion(&self.message)
    }
}
