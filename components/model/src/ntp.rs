use std::fmt::{self, Display, Formatter};

/// Namespace that Kafka-visible topics live in.
pub const KAFKA_NAMESPACE: &str = "kafka";

/// Topic plus partition index, as addressed by Kafka clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Namespace/topic/partition: the addressing unit of a partition log inside the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ntp {
    pub namespace: String,
    pub tp: TopicPartition,
}

impl Ntp {
    pub fn new(namespace: impl Into<String>, topic: impl Into<String>, partition: i32) -> Self {
        Self {
            namespace: namespace.into(),
            tp: TopicPartition::new(topic, partition),
        }
    }

    /// Build an NTP in the Kafka namespace.
    pub fn kafka(topic: impl Into<String>, partition: i32) -> Self {
        Self::new(KAFKA_NAMESPACE, topic, partition)
    }

    pub fn topic(&self) -> &str {
        &self.tp.topic
    }

    pub fn partition(&self) -> i32 {
        self.tp.partition
    }
}

impl From<TopicPartition> for Ntp {
    fn from(tp: TopicPartition) -> Self {
        Self {
            namespace: KAFKA_NAMESPACE.to_owned(),
            tp,
        }
    }
}

impl Display for Ntp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.tp)
    }
}

#[cfg(test)]
mod tests {
    use super::{Ntp, TopicPartition};

    #[test]
    fn test_display() {
        let ntp = Ntp::kafka("orders", 3);
        assert_eq!("kafka/orders/3", ntp.to_string());
        assert_eq!("orders", ntp.topic());
        assert_eq!(3, ntp.partition());
    }

    #[test]
    fn test_from_topic_partition() {
        let ntp: Ntp = TopicPartition::new("orders", 1).into();
        assert_eq!(Ntp::kafka("orders", 1), ntp);
    }
}
