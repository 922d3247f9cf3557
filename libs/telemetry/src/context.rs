/// Labels attached to metrics and spans for a single message.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLabels {
    pub tenant: String,
    pub platform: Option<String>,
    pub bot_id: Option<String>,
    pub peer_id: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Default::default()
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_bot(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = Some(bot_id.into());
        self
    }

    pub fn with_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Metric tags. Peer ids are left out to keep cardinality bounded.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("tenant".into(), self.tenant.clone()));
        if let Some(p) = &self.platform {
            tags.push(("platform".into(), p.clone()));
        }
        if let Some(bot) = &self.bot_id {
            tags.push(("bot".into(), bot.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

#[derive(Debug, Clone)]
pub struct MessageContext {
    pub labels: TelemetryLabels,
}

impl MessageContext {
    pub fn new(labels: TelemetryLabels) -> Self {
        Self { labels }
    }
}
