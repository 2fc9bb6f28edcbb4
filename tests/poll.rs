//! Polling through an in-memory register source.

use igntc_tools::poll::{Poller, ReadError, WordSource};
use igntc_tools::register_map::RegisterMap;
use igntc_tools::registers::{DecodeError, Validation, Value};
use igntc_tools::schema::resolve;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

const EXPORT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/ig-ntc-bb.txt");

#[derive(thiserror::Error, Debug)]
#[error("holding register {0} is not available")]
struct Unavailable(u16);

#[derive(Default)]
struct Memory {
    words: BTreeMap<u16, u16>,
    reads: RefCell<Vec<(u16, u16)>>,
}

impl Memory {
    fn with<const N: usize>(words: &[(u32, [u16; N])]) -> Self {
        let mut memory = Memory::default();
        for &(register, values) in words {
            let base = u16::try_from(register - 40000).unwrap();
            for (offset, value) in (0..).zip(values) {
                memory.words.insert(base + offset, value);
            }
        }
        memory
    }
}

impl WordSource for Memory {
    type Error = Unavailable;

    async fn read_words(&self, address: u16, count: u16) -> Result<Vec<u16>, Unavailable> {
        self.reads.borrow_mut().push((address, count));
        (address..address + count)
            .map(|a| self.words.get(&a).copied().ok_or(Unavailable(a)))
            .collect()
    }
}

fn poller() -> Poller {
    let map = RegisterMap::load(Path::new(EXPORT)).unwrap();
    Poller::new(resolve(&map).unwrap())
}

#[test]
fn groups_are_sorted_and_ordered() {
    let poller = poller();
    let groups = poller.groups().collect::<Vec<_>>();
    assert_eq!(
        groups,
        [
            "Basic settings",
            "Bin inputs CU",
            "Bin outputs CU",
            "Comms settings",
            "Date/Time",
            "Engine values",
            "Statistics"
        ]
    );
    let engine = poller.group("Engine values").map(|e| e.name.as_str()).collect::<Vec<_>>();
    assert_eq!(engine, ["RPM", "Oil press", "Engine state", "Ubat"]);
    assert_eq!(poller.group("No such group").count(), 0);
}

#[test]
fn looks_up_by_group_and_name() {
    let poller = poller();
    assert_eq!(poller.lookup("Engine values", "RPM").map(|e| e.register), Some(40010));
    assert!(poller.lookup("Basic settings", "RPM").is_none());
}

#[tokio::test]
async fn polls_single_register() {
    let poller = poller();
    let memory = Memory::with(&[(40013, [4, 0])]);
    let entry = poller.lookup("Engine values", "Engine state").unwrap();
    let reading = poller.poll(&memory, entry).await;
    let decoded = reading.outcome.unwrap();
    assert_eq!(decoded.value, Value::Label("4: Cooling".into()));
    assert_eq!(decoded.validation, Validation::NotApplicable);
    assert_eq!(*memory.reads.borrow(), [(13, 2)]);
}

#[tokio::test]
async fn failures_do_not_stop_a_batch() {
    let poller = poller();
    let memory = Memory::with(&[
        (40010, [1800, 0]),
        (40012, [55, 0]),
        (40013, [42, 0]),
    ]);
    let readings = poller.poll_group(&memory, "Engine values").await;
    assert_eq!(readings.len(), 4);

    let rpm = readings[0].outcome.as_ref().unwrap();
    assert_eq!(rpm.value.to_string(), "1800");
    assert_eq!(rpm.validation, Validation::Pass);

    let oil = readings[1].outcome.as_ref().unwrap();
    assert_eq!(oil.value.to_string(), "5.5");

    assert!(matches!(
        readings[2].outcome,
        Err(ReadError::Decode(DecodeError::UnknownListValue { value: 42, .. }))
    ));
    assert_eq!(readings[3].schema.name, "Ubat");
    assert!(matches!(readings[3].outcome, Err(ReadError::Transport(_))));
}

#[tokio::test]
async fn polls_everything() {
    let poller = poller();
    let memory = Memory::default();
    let readings = poller.poll_all(&memory).await;
    assert_eq!(readings.len(), poller.entries().len());
    assert!(readings.iter().all(|r| r.outcome.is_err()));
    assert_eq!(memory.reads.borrow().len(), poller.entries().len());
}

#[test]
fn decodes_supplied_words() {
    let poller = poller();
    let entry = poller.lookup("Bin outputs CU", "BOUT").unwrap();
    let decoded = poller.decode(entry, &[0x8000]).unwrap();
    let Value::Bits(bits) = decoded.value else {
        panic!("expected bits");
    };
    assert!(bits[15]);
    assert_eq!(bits.iter().filter(|&&b| b).count(), 1);
}
