use fleet_wire::{AgentId, Envelope, EventType};

/// Selects the slice of history an agent's `respond` should see for a given triggering
/// message. The three stock selectors below all truncate at (and include) `incoming`; they
/// differ only in which *other* messages they admit.
pub trait MessageViewSelector: Send + Sync {
    fn select(&self, history: &[Envelope], incoming: &Envelope) -> Vec<Envelope>;
}

fn truncate_at<'a>(history: &'a [Envelope], incoming: &Envelope) -> &'a [Envelope] {
    match history.iter().position(|m| m.message_id == incoming.message_id) {
        Some(idx) => &history[..=idx],
        None => history,
    }
}

fn is_direct_pair(m: &Envelope, a: &AgentId, b: &AgentId) -> bool {
    let (src, dst) = (m.source.as_ref(), m.destination.as_ref());
    (src == Some(a) && dst == Some(b)) || (src == Some(b) && dst == Some(a))
}

/// Admits only messages exchanged directly between `incoming`'s source and destination,
/// on the same channel (if any).
pub struct DirectMessageViewSelector {
    pub include_internal_events: bool,
}

impl MessageViewSelector for DirectMessageViewSelector {
    fn select(&self, history: &[Envelope], incoming: &Envelope) -> Vec<Envelope> {
        let slice = truncate_at(history, incoming);
        let (Some(src), Some(dst)) = (incoming.source.as_ref(), incoming.destination.as_ref())
        else {
            return slice.to_vec();
        };
        slice
            .iter()
            .filter(|m| {
                if m.is_internal() && !self.include_internal_events {
                    return false;
                }
                is_direct_pair(m, src, dst) && m.channel == incoming.channel
            })
            .cloned()
            .collect()
    }
}

/// Admits every message on the same channel as `incoming`; if `incoming` is itself a
/// direct (channel-less) message, behaves exactly like [`DirectMessageViewSelector`].
pub struct ChannelMessageViewSelector {
    pub include_internal_events: bool,
}

impl MessageViewSelector for ChannelMessageViewSelector {
    fn select(&self, history: &[Envelope], incoming: &Envelope) -> Vec<Envelope> {
        let slice = truncate_at(history, incoming);
        match incoming.channel.as_ref() {
            Some(channel) => slice
                .iter()
                .filter(|m| {
                    if m.is_internal() && !self.include_internal_events {
                        return false;
                    }
                    m.channel.as_deref() == Some(channel.as_str())
                })
                .cloned()
                .collect(),
            None => DirectMessageViewSelector {
                include_internal_events: self.include_internal_events,
            }
            .select(history, incoming),
        }
    }
}

/// Admits everything up to and including `incoming`.
pub struct GlobalMessageViewSelector {
    pub include_internal_events: bool,
}

impl MessageViewSelector for GlobalMessageViewSelector {
    fn select(&self, history: &[Envelope], incoming: &Envelope) -> Vec<Envelope> {
        let slice = truncate_at(history, incoming);
        slice
            .iter()
            .filter(|m| self.include_internal_events || !m.is_internal())
            .cloned()
            .collect()
    }
}

impl Default for GlobalMessageViewSelector {
    fn default() -> Self {
        Self {
            include_internal_events: true,
        }
    }
}

/// Merges external history with an agent's own internal events, sorted by timestamp, the
/// way `respond` sees them: internal events are not delivered by the router, only ever
/// produced locally, so they must be spliced in before a selector runs.
pub fn merge_with_internal_events(history: &[Envelope], internal_events: &[Envelope]) -> Vec<Envelope> {
    let mut merged: Vec<Envelope> = history.iter().chain(internal_events.iter()).cloned().collect();
    merged.sort_by_key(|m| m.timestamp.unwrap_or(0));
    merged
}
