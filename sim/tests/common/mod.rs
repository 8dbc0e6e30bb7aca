#![allow(dead_code)]

use sim::{
    data::GameData, player::CharacterSnapshot, AiType, Coord, Handle, MapId, MonsterSpecies, Outbound,
    SimConfig, SimEvent, WalkData, World, FRAME_DURATION,
};
use std::time::Duration;

pub const SEED: u64 = 0x5eed;

/// A walled room with a pillar in the middle.
pub const ROOM: &str = "\
####################
#..................#
#..................#
#..................#
#.......##.........#
#.......##.........#
#..................#
#..................#
#..................#
####################
";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An open field wide enough to step out of view in one jump.
pub fn long_field() -> String {
    let width = 72;
    let mut txt = String::new();
    txt.push_str(&"#".repeat(width));
    txt.push('\n');
    for _ in 0..10 {
        txt.push('#');
        txt.push_str(&".".repeat(width - 2));
        txt.push_str("#\n");
    }
    txt.push_str(&"#".repeat(width));
    txt.push('\n');
    txt
}

pub fn config() -> SimConfig {
    SimConfig {
        spawn_immunity: Duration::ZERO,
        ..SimConfig::default()
    }
}

pub fn game_data() -> GameData {
    let mut data = GameData::default();
    data.add_species(MonsterSpecies {
        hp: 60,
        ..MonsterSpecies::new("poring", "Poring")
    });
    data.add_species(MonsterSpecies {
        ai_type: AiType::Aggressive,
        hp: 200,
        scan_distance: 12,
        ..MonsterSpecies::new("wolf", "Wolf")
    });
    data.add_species(MonsterSpecies {
        hp: 5000,
        agi: 0,
        move_speed: Duration::ZERO,
        ai_type: AiType::Empty,
        ..MonsterSpecies::new("dummy", "Training Dummy")
    });
    data
}

pub fn world_with(map: &str, data: GameData) -> (World, MapId) {
    world_with_config(map, data, config())
}

pub fn world_with_config(map: &str, data: GameData, config: SimConfig) -> (World, MapId) {
    init_logging();
    let mut world = World::new(SEED, data, config);
    let walk = WalkData::from_text(map).expect("fixture map should parse");
    let map = world.add_map("test_field", walk);
    (world, map)
}

pub fn world(map: &str) -> (World, MapId) {
    world_with(map, game_data())
}

pub fn player(world: &mut World, map: MapId, name: &str, x: i32, y: i32) -> Handle {
    let snapshot = CharacterSnapshot {
        str: 20,
        dex: 20,
        ..CharacterSnapshot::new(name, Coord::new(x, y))
    };
    world.create_player(map, &snapshot).expect("player should spawn")
}

pub fn tick_for(world: &mut World, duration: Duration) {
    let frames = (duration.as_micros() / FRAME_DURATION.as_micros()).max(1);
    for _ in 0..frames {
        world.tick(FRAME_DURATION);
    }
}

/// Ticks until `done` holds, giving up after `limit`. Returns whether it held.
pub fn tick_until(world: &mut World, limit: Duration, mut done: impl FnMut(&World) -> bool) -> bool {
    let frames = limit.as_micros() / FRAME_DURATION.as_micros();
    for _ in 0..frames {
        if done(world) {
            return true;
        }
        world.tick(FRAME_DURATION);
    }
    done(world)
}

pub fn events_for(outbox: &[Outbound], recipient: Handle) -> Vec<SimEvent> {
    outbox
        .iter()
        .filter(|outbound| outbound.recipients.contains(&recipient))
        .map(|outbound| outbound.event.clone())
        .collect()
}

pub fn sees(world: &World, observer: Handle, observed: Handle) -> bool {
    world
        .registry()
        .world_object(observed)
        .map_or(false, |obj| obj.is_player_visible(observer))
}
