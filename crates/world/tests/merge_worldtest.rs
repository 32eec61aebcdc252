//! Whole-chunk synthesis with the merge pass against in-memory sources.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata_core::{blocks, ChunkPos, WorldRng, BLOCK_AIR};
use strata_mantle::{Mantle, MantleError, MantleSettings};
use strata_testkit::{sources_with_world, CountingStore, FlatSampler, FnSampler, GridSource, TableLayers};
use strata_world::{
    ChunkBuffer, ChunkContext, ChunkOutcome, ColumnSynthesizer, DimensionSettings, MergeError,
    MergeMode, MergeSettings, Merger, OreChain, SynthError, TerrainSources,
};

const TOP: u16 = 100;
const MARKER: u16 = 250;

fn dimension() -> DimensionSettings {
    DimensionSettings {
        height: 128,
        fluid_height: 63,
        bedrock: true,
    }
}

fn mantle() -> (Arc<CountingStore>, Arc<Mantle>) {
    let store = Arc::new(CountingStore::new());
    let mantle = Arc::new(Mantle::new(store.clone(), MantleSettings::default()));
    (store, mantle)
}

fn synth_with(settings: MergeSettings, sources: Option<Arc<dyn TerrainSources>>) -> ColumnSynthesizer {
    let (_, mantle) = mantle();
    let layers = Arc::new(TableLayers::new(vec![TOP], vec![]));
    ColumnSynthesizer::new(dimension(), layers, OreChain::new(), WorldRng::new(4))
        .with_merger(Merger::new(settings, sources, mantle))
}

fn split_settings(split: i32, split_under: bool) -> MergeSettings {
    MergeSettings {
        enabled: true,
        mode: MergeMode::Split,
        split,
        split_under,
        world: Some("source".into()),
        ..Default::default()
    }
}

fn marker_sources() -> Arc<dyn TerrainSources> {
    sources_with_world("source", Arc::new(GridSource::filled(MARKER, 128)))
}

#[test]
fn fixed_split_overrides_levels_above_threshold() {
    let synth = synth_with(split_settings(40, true), Some(marker_sources()));
    let pos = ChunkPos::new(2, 2);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);

    let outcome = synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
    assert_eq!(
        outcome,
        ChunkOutcome::Complete {
            skipped_columns: 0,
            merged_blocks: 256 * (128 - 41),
        }
    );
    for (x, z) in [(0, 0), (15, 15), (7, 3)] {
        let column = buffer.column(x, z);
        assert!(column[41..].iter().all(|b| *b == MARKER));
        assert_eq!(column[40], blocks::STONE);
        assert_eq!(column[0], blocks::BEDROCK);
    }
}

#[test]
fn split_under_false_overrides_below_threshold() {
    let synth = synth_with(split_settings(40, false), Some(marker_sources()));
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);

    synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
    let column = buffer.column(4, 4);
    assert!(column[..40].iter().all(|b| *b == MARKER));
    assert_eq!(column[40], blocks::STONE);
    assert_eq!(column[70], TOP);
    assert_eq!(column[71], BLOCK_AIR);
}

#[test]
fn terrain_height_mode_reads_reference_field_through_the_mantle() {
    let (store, mantle) = mantle();
    let settings = MergeSettings {
        enabled: true,
        mode: MergeMode::SplitTerrainHeight,
        depth: 10,
        split_under: false,
        world: Some("source".into()),
        ..Default::default()
    };
    let layers = Arc::new(TableLayers::new(vec![TOP], vec![]));
    let synth = ColumnSynthesizer::new(dimension(), layers, OreChain::new(), WorldRng::new(4))
        .with_merger(Merger::new(settings, Some(marker_sources()), Arc::clone(&mantle)));

    // Height rises by one per block along x.
    let sampler = FnSampler::new(|x, _| Some(f64::from(60 + x)));
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&sampler, pos);
    let mut buffer = ChunkBuffer::new(pos, 128);
    synth.synthesize_chunk(&mut buffer, &ctx).unwrap();

    for x in [0usize, 8, 15] {
        let threshold = 60 + x - 10;
        let column = buffer.column(x, 0);
        assert!(column[..threshold].iter().all(|b| *b == MARKER), "column {x}");
        assert_ne!(column[threshold], MARKER);
    }

    assert_eq!(store.loads(), 1);
    let plate = mantle.get(pos.plate()).unwrap();
    let field = plate.height_field(pos).expect("reference field cached");
    assert_eq!(field[3], 63.0);
}

#[test]
fn missing_source_world_is_a_configuration_error() {
    let sources: Arc<dyn TerrainSources> =
        sources_with_world("other", Arc::new(GridSource::filled(MARKER, 128)));
    let synth = synth_with(split_settings(40, true), Some(sources));
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);

    let err = synth.synthesize_chunk(&mut buffer, &ctx).unwrap_err();
    let SynthError::Merge { chunk, source } = err;
    assert_eq!(chunk, pos);
    assert!(matches!(source, MergeError::SourceUnavailable { ref world } if world == "source"));
}

#[test]
fn uninitialized_sources_are_a_configuration_error() {
    let synth = synth_with(split_settings(40, true), None);
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);
    let SynthError::Merge { source, .. } = synth.synthesize_chunk(&mut buffer, &ctx).unwrap_err();
    assert!(matches!(source, MergeError::SourceUninitialized));
}

#[test]
fn generator_source_fails_fast() {
    let mut settings = split_settings(40, true);
    settings.generator = Some("vanilla".into());
    let synth = synth_with(settings, Some(marker_sources()));
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);
    let SynthError::Merge { source, .. } = synth.synthesize_chunk(&mut buffer, &ctx).unwrap_err();
    assert!(matches!(source, MergeError::UnsupportedSource { .. }));
}

#[test]
fn disabled_merge_ignores_missing_sources() {
    let mut settings = split_settings(40, true);
    settings.enabled = false;
    let synth = synth_with(settings, None);
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);
    let outcome = synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
    assert!(outcome.is_complete());
    assert_eq!(buffer.get(0, 70, 0), TOP);
}

#[test]
fn failed_fetch_is_contained_to_the_chunk() {
    let sources: Arc<dyn TerrainSources> =
        sources_with_world("source", Arc::new(GridSource::failing()));
    let synth = synth_with(split_settings(40, true), Some(sources));
    let pos = ChunkPos::new(9, 9);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);

    let outcome = synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
    match outcome {
        ChunkOutcome::Failed { reason } => assert!(reason.contains("not been generated")),
        other => panic!("expected failure, got {other:?}"),
    }
    // Columns synthesized before the merge pass stay in place.
    assert_eq!(buffer.get(0, 70, 0), TOP);
    assert_eq!(synth.metrics().failed, 1);
}

#[test]
fn columns_without_height_are_skipped() {
    let layers = Arc::new(TableLayers::new(vec![TOP], vec![]));
    let synth = ColumnSynthesizer::new(dimension(), layers, OreChain::new(), WorldRng::new(0));
    let sampler = FnSampler::new(|x, _| (x % 2 == 0).then_some(50.0));
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&sampler, pos);
    let mut buffer = ChunkBuffer::new(pos, 128);

    let outcome = synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
    assert_eq!(
        outcome,
        ChunkOutcome::Complete {
            skipped_columns: 128,
            merged_blocks: 0,
        }
    );
    assert_eq!(buffer.get(1, 0, 0), BLOCK_AIR);
    assert_eq!(buffer.get(0, 0, 0), blocks::BEDROCK);
}

#[test]
fn layer_sequences_are_requested_once_per_column() {
    let layers = Arc::new(TableLayers::new(vec![TOP, TOP], vec![MARKER]));
    let synth = ColumnSynthesizer::new(dimension(), layers.clone(), OreChain::new(), WorldRng::new(0));
    let pos = ChunkPos::new(0, 0);
    let ctx = ChunkContext::sample(&FlatSampler::new(50.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);

    synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
    assert_eq!(layers.solid_calls(), 256);
    assert_eq!(layers.sea_calls(), 256);
    assert_eq!(buffer.get(3, 63, 3), MARKER);
    assert_eq!(buffer.get(3, 62, 3), blocks::WATER);
}

fn terrain_synth(store: Arc<CountingStore>, source: Arc<GridSource>) -> (Arc<Mantle>, ColumnSynthesizer) {
    let mantle = Arc::new(Mantle::new(store, MantleSettings::default()));
    let settings = MergeSettings {
        enabled: true,
        mode: MergeMode::SplitTerrainHeight,
        depth: 5,
        world: Some("source".into()),
        ..Default::default()
    };
    let layers = Arc::new(TableLayers::new(vec![TOP], vec![]));
    let synth = ColumnSynthesizer::new(dimension(), layers, OreChain::new(), WorldRng::new(1))
        .with_merger(Merger::new(
            settings,
            Some(sources_with_world("source", source) as Arc<dyn TerrainSources>),
            Arc::clone(&mantle),
        ));
    (mantle, synth)
}

#[test]
fn chunks_sharing_a_plate_load_it_once() {
    let store = Arc::new(CountingStore::with_load_delay(Duration::from_millis(30)));
    let source = Arc::new(GridSource::filled(MARKER, 128));
    let (mantle, synth) = terrain_synth(store.clone(), source.clone());
    let sampler = FlatSampler::new(70.0);

    thread::scope(|scope| {
        for i in 0..8 {
            let synth = &synth;
            let sampler = &sampler;
            scope.spawn(move || {
                let pos = ChunkPos::new(i, 3);
                let ctx = ChunkContext::sample(sampler, pos);
                let mut buffer = ChunkBuffer::new(pos, 128);
                let outcome = synth.synthesize_chunk(&mut buffer, &ctx).unwrap();
                assert!(outcome.is_complete());
                assert_eq!(buffer.get(0, 66, 0), MARKER);
                assert_eq!(buffer.get(0, 65, 0), blocks::STONE);
            });
        }
    });

    assert_eq!(store.loads(), 1);
    assert_eq!(source.fetches(), 8);
    assert_eq!(mantle.resident(), 1);
    assert_eq!(mantle.get(ChunkPos::new(0, 3).plate()).unwrap().section_count(), 8);
}

#[test]
fn failed_persist_keeps_the_plate_resident() {
    let store = Arc::new(CountingStore::new());
    let (mantle, synth) = terrain_synth(store.clone(), Arc::new(GridSource::filled(MARKER, 128)));
    let pos = ChunkPos::new(40, -7);
    let ctx = ChunkContext::sample(&FlatSampler::new(70.0), pos);
    let mut buffer = ChunkBuffer::new(pos, 128);
    synth.synthesize_chunk(&mut buffer, &ctx).unwrap();

    store.set_fail_persist(true);
    assert!(matches!(mantle.unload(0), Err(MantleError::Store { .. })));
    assert!(mantle.is_resident(pos.plate()));
    assert!(!store.contains(pos.plate()));

    store.set_fail_persist(false);
    assert_eq!(mantle.unload(0).unwrap(), 1);
    assert!(!mantle.is_resident(pos.plate()));
    assert!(store.contains(pos.plate()));
    assert_eq!(store.persists(), 2);
}
