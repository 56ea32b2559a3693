use model::{
    response::{FetchableTopicResponse, PartitionResponse},
    TopicPartition,
};

use super::read::ReadResult;

/// Index of a response slot within [`ResponseSlots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

#[derive(Debug)]
struct Slot {
    tp: TopicPartition,
    result: Option<ReadResult>,

    /// Pass in which the slot was last written.
    written_in: Option<u32>,
}

impl Slot {
    /// A slot is final once it holds data or an error. Final slots are excluded from later passes.
    fn is_final(&self) -> bool {
        match &self.result {
            Some(result) => result.is_error() || result.records_size() > 0,
            None => false,
        }
    }
}

/// Pre-sized response arena, one slot per resolved partition in final response order.
///
/// Shard results are placed by slot index, so arrival order never affects placement.
#[derive(Debug)]
pub struct ResponseSlots {
    slots: Vec<Slot>,
    pass: u32,
}

impl ResponseSlots {
    pub fn create_placeholders<I>(partitions: I) -> Self
    where
        I: IntoIterator<Item = TopicPartition>,
    {
        let slots = partitions
            .into_iter()
            .map(|tp| Slot {
                tp,
                result: None,
                written_in: None,
            })
            .collect();
        Self { slots, pass: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Start a new planning pass. Every non-final slot may be written once more.
    pub fn begin_pass(&mut self) -> u32 {
        self.pass += 1;
        self.pass
    }

    pub fn topic_partition(&self, id: SlotId) -> Option<&TopicPartition> {
        self.slots.get(id.0).map(|slot| &slot.tp)
    }

    pub fn get(&self, id: SlotId) -> Option<&ReadResult> {
        self.slots.get(id.0).and_then(|slot| slot.result.as_ref())
    }

    pub fn is_final(&self, id: SlotId) -> bool {
        self.slots.get(id.0).map_or(false, Slot::is_final)
    }

    /// Write a result into its slot.
    ///
    /// Returns `false` without touching the slot if it is final already or has been written in
    /// the current pass.
    pub fn set(&mut self, id: SlotId, result: ReadResult) -> bool {
        let pass = self.pass;
        let slot = match self.slots.get_mut(id.0) {
            Some(slot) => slot,
            None => return false,
        };
        if slot.is_final() || slot.written_in == Some(pass) {
            return false;
        }
        slot.result = Some(result);
        slot.written_in = Some(pass);
        true
    }

    /// Slots still waiting for data, in slot order.
    pub fn pending(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_final())
            .map(|(index, _)| SlotId(index))
    }

    pub fn written(&self) -> usize {
        self.slots.iter().filter(|slot| slot.result.is_some()).count()
    }

    /// Consume the arena into per-partition responses, in slot order.
    pub fn into_responses(self) -> Vec<(TopicPartition, PartitionResponse)> {
        self.slots
            .into_iter()
            .map(|slot| {
                let partition_index = slot.tp.partition;
                let response = match slot.result {
                    Some(result) => result.into_partition_response(partition_index),
                    None => PartitionResponse::new(partition_index),
                };
                (slot.tp, response)
            })
            .collect()
    }
}

/// Group partition responses by topic, merging consecutive entries of the same topic.
pub fn group_by_topic(
    entries: Vec<(TopicPartition, PartitionResponse)>,
) -> Vec<FetchableTopicResponse> {
    let mut topics: Vec<FetchableTopicResponse> = vec![];
    for (tp, response) in entries {
        match topics.last_mut() {
            Some(last) if last.name == tp.topic => last.partitions.push(response),
            _ => topics.push(FetchableTopicResponse {
                name: tp.topic,
                partitions: vec![response],
            }),
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use model::{ErrorCode, TopicPartition};

    use super::{group_by_topic, ResponseSlots, SlotId};
    use crate::fetch::read::{FetchedData, ReadResult};

    fn data(len: usize) -> ReadResult {
        ReadResult::Data(FetchedData {
            records: Bytes::from(vec![0u8; len]),
            start_offset: 0,
            high_watermark: 10,
            last_stable_offset: 10,
            log_start_offset: 0,
            aborted_transactions: None,
        })
    }

    fn slots() -> ResponseSlots {
        ResponseSlots::create_placeholders(vec![
            TopicPartition::new("a", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("b", 0),
        ])
    }

    #[test]
    fn test_set_once_per_pass() {
        let mut slots = slots();
        assert_eq!(3, slots.len());
        slots.begin_pass();
        assert!(slots.set(SlotId(0), data(0)));
        assert!(!slots.set(SlotId(0), data(8)));
        assert!(!slots.is_final(SlotId(0)));

        slots.begin_pass();
        assert!(slots.set(SlotId(0), data(8)));
        assert!(slots.is_final(SlotId(0)));

        slots.begin_pass();
        assert!(!slots.set(SlotId(0), data(16)));
        assert_eq!(Some(8), slots.get(SlotId(0)).map(ReadResult::records_size));
        assert!(!slots.set(SlotId(7), data(1)));
    }

    #[test]
    fn test_pending() {
        let mut slots = slots();
        slots.begin_pass();
        slots.set(SlotId(0), data(0));
        slots.set(SlotId(1), ReadResult::Error(ErrorCode::NotLeaderForPartition));
        slots.set(SlotId(2), data(4));
        assert_eq!(vec![SlotId(0)], slots.pending().collect::<Vec<_>>());
        assert_eq!(3, slots.written());
    }

    #[test]
    fn test_into_responses() {
        let mut slots = slots();
        slots.begin_pass();
        slots.set(SlotId(2), data(4));
        slots.set(SlotId(1), ReadResult::Error(ErrorCode::OffsetOutOfRange));
        slots.set(SlotId(0), data(0));

        let topics = group_by_topic(slots.into_responses());
        assert_eq!(2, topics.len());
        assert_eq!("a", topics[0].name);
        assert_eq!(0, topics[0].partitions[0].partition_index);
        assert_eq!(ErrorCode::None, topics[0].partitions[0].error_code);
        assert_eq!(ErrorCode::OffsetOutOfRange, topics[0].partitions[1].error_code);
        assert_eq!("b", topics[1].name);
        assert_eq!(4, topics[1].partitions[0].records_size());
        assert_eq!(10, topics[1].partitions[0].high_watermark);
    }
}
