//! Concurrency guarantees of the plate cache under parallel callers and
//! maintenance passes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use strata_core::{ChunkPos, PlateCoord, CHUNK_COLUMNS};
use strata_mantle::{
    Mantle, MantleError, MantleSettings, MemoryPlateStore, PlatePayload, PlateStore,
    RegionPlateStore,
};

/// Store that counts loads and stalls each one so racing callers overlap.
struct SlowStore {
    inner: MemoryPlateStore,
    loads: AtomicUsize,
    delay: Duration,
}

impl SlowStore {
    fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryPlateStore::new(),
            loads: AtomicUsize::new(0),
            delay,
        }
    }
}

impl PlateStore for SlowStore {
    fn load(&self, coord: PlateCoord) -> Result<Option<PlatePayload>, MantleError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.load(coord)
    }

    fn persist(&self, coord: PlateCoord, payload: &PlatePayload) -> Result<(), MantleError> {
        self.inner.persist(coord, payload)
    }
}

fn long_idle() -> MantleSettings {
    MantleSettings {
        idle_unload: Duration::from_secs(3600),
    }
}

#[test]
fn concurrent_get_loads_each_plate_once() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(50)));
    let mantle = Arc::new(Mantle::new(store.clone(), long_idle()));
    let callers = 16;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let mantle = Arc::clone(&mantle);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                mantle.get(PlateCoord::new(4, -4)).unwrap()
            })
        })
        .collect();
    let plates: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    assert!(plates.iter().all(|p| Arc::ptr_eq(p, &plates[0])));
    assert_eq!(mantle.stats().loads, 1);
}

#[test]
fn distinct_plates_load_in_parallel() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(10)));
    let mantle = Arc::new(Mantle::new(store.clone(), long_idle()));

    let handles: Vec<_> = (0..8)
        .map(|x| {
            let mantle = Arc::clone(&mantle);
            thread::spawn(move || mantle.get(PlateCoord::new(x, 0)).unwrap().coord())
        })
        .collect();
    for (x, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), PlateCoord::new(x as i32, 0));
    }
    assert_eq!(store.loads.load(Ordering::SeqCst), 8);
}

#[test]
fn unload_racing_writers_never_loses_data() {
    let store = Arc::new(SlowStore::new(Duration::ZERO));
    let mantle = Arc::new(Mantle::new(store.clone(), long_idle()));
    let writers = 4;
    let rounds = 200;

    let evictor = {
        let mantle = Arc::clone(&mantle);
        thread::spawn(move || {
            for _ in 0..rounds {
                let _ = mantle.unload(0);
                thread::yield_now();
            }
        })
    };

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let mantle = Arc::clone(&mantle);
            thread::spawn(move || {
                for round in 0..rounds {
                    let chunk = ChunkPos::new(w * 32 + (round % 4), 0);
                    let plate = mantle.get(chunk.plate()).unwrap();
                    plate.store_height_field(chunk, vec![round as f64; CHUNK_COLUMNS]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    evictor.join().unwrap();
    mantle.flush().unwrap();

    // Every chunk reads back the last value written to it, whether its plate
    // stayed resident or went through the store.
    for w in 0..writers {
        let coord = PlateCoord::new(w, 0);
        assert!(mantle.is_resident(coord) || store.inner.contains(coord));
        for offset in 0..4 {
            let chunk = ChunkPos::new(w * 32 + offset, 0);
            let field = mantle.get(coord).unwrap().height_field(chunk).unwrap();
            let last_round = rounds - 4 + offset;
            assert!(
                field.iter().all(|h| *h == last_round as f64),
                "chunk {chunk} lost its last write"
            );
        }
    }

    // Evict everything and read once more from the store alone.
    assert_eq!(mantle.unload(0).unwrap(), writers as usize);
    for w in 0..writers {
        let chunk = ChunkPos::new(w * 32 + 3, 0);
        let field = mantle.get(chunk.plate()).unwrap().height_field(chunk).unwrap();
        assert_eq!(field[0], (rounds - 1) as f64);
    }
}

#[test]
fn plates_survive_a_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let chunk = ChunkPos::new(-40, 70);
    {
        let store = Arc::new(RegionPlateStore::new(dir.path()).unwrap());
        let mantle = Mantle::new(store, long_idle());
        mantle
            .reference_heights(chunk, |x, z| Some(f64::from(x - z)))
            .unwrap();
        assert_eq!(mantle.unload(0).unwrap(), 1);
    }

    let store = Arc::new(RegionPlateStore::new(dir.path()).unwrap());
    let mantle = Mantle::new(store, long_idle());
    let field = mantle
        .reference_heights(chunk, |_, _| panic!("field should come from disk"))
        .unwrap();
    assert_eq!(field[0], f64::from(-640 - 1120));
}
