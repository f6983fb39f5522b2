//! # Packet Dispatch
//!
//! Inbound game packets carry a one-byte command tag; this table decodes
//! each command's tuple with the shared read cursor and invokes the
//! matching world operation. Runs on the game-logic thread.
//!
//! Policy, enforced before the table is consulted:
//! - no player attached: only enter-world (0x0F) is tolerated, anything
//!   else detaches the connection;
//! - player dead or removed: only logout (0x14) is honoured;
//! - after a successful decode, a cursor that overran the buffer means a
//!   malformed packet and detaches the connection.
//!
//! Commands without a table entry are forwarded to the world for logging.

use crate::core::packet::NetworkMessage;
use crate::game::send;
use crate::game::session::detach;
use crate::game::thread::GameState;
use crate::game::{
    Direction, FightMode, FightModes, GameWorld, Outfit, PlayerId, SpeakClass, WorldState,
    MARKET_BROWSE_OWN_HISTORY, MARKET_BROWSE_OWN_OFFERS, REPORT_TYPE_NAME, REPORT_TYPE_STATEMENT,
};
use crate::service::game::Connection;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decode one packet and drive the world.
pub fn parse_packet(state: &mut GameState, connection: &Arc<Connection>, data: &[u8]) {
    let mut input = NetworkMessage::from_bytes(data);
    if !input.can_read(1) || state.world.world_state() == WorldState::Shutdown {
        return;
    }

    let command = input.get_u8();

    let Some(player) = connection.player() else {
        if command == 0x0F {
            debug!(peer = %connection.peer(), "enter-world before attach");
        } else {
            detach(state.world.as_mut(), connection);
        }
        return;
    };

    if state.world.player_is_dead_or_removed(player) {
        if command == 0x14 {
            state.world.player_logout(player, false);
        } else {
            detach(state.world.as_mut(), connection);
        }
        return;
    }

    let world = state.world.as_mut();
    match command {
        0x0F => world.player_enter_world(player),
        0x14 => world.player_logout(player, false),
        0x1D => world.player_receive_ping_back(player),
        0x1E => world.player_receive_ping(player),
        0x32 => parse_extended_opcode(world, player, &mut input),
        0x64 => parse_auto_walk(world, player, connection, &mut input),
        0x65 => world.player_walk(player, Direction::North),
        0x66 => world.player_walk(player, Direction::East),
        0x67 => world.player_walk(player, Direction::South),
        0x68 => world.player_walk(player, Direction::West),
        0x69 => world.player_stop_auto_walk(player),
        0x6A => world.player_walk(player, Direction::NorthEast),
        0x6B => world.player_walk(player, Direction::SouthEast),
        0x6C => world.player_walk(player, Direction::SouthWest),
        0x6D => world.player_walk(player, Direction::NorthWest),
        0x6F => world.player_turn(player, Direction::North),
        0x70 => world.player_turn(player, Direction::East),
        0x71 => world.player_turn(player, Direction::South),
        0x72 => world.player_turn(player, Direction::West),
        0x77 => parse_equip_object(world, player, &mut input),
        0x78 => parse_throw(world, player, &mut input),
        0x79 => parse_look_in_shop(world, player, &mut input),
        0x7A => parse_purchase(world, player, &mut input),
        0x7B => parse_sale(world, player, &mut input),
        0x7C => world.player_close_shop(player),
        0x7D => parse_request_trade(world, player, &mut input),
        0x7E => parse_look_in_trade(world, player, &mut input),
        0x7F => world.player_accept_trade(player),
        0x80 => world.player_close_trade(player),
        0x82 => parse_use_item(world, player, &mut input),
        0x83 => parse_use_item_ex(world, player, &mut input),
        0x84 => parse_use_with_creature(world, player, &mut input),
        0x85 => parse_rotate_item(world, player, &mut input),
        0x86 => parse_edit_podium_request(world, player, &mut input),
        0x87 => {
            let container_id = input.get_u8();
            world.player_close_container(player, container_id);
        }
        0x88 => {
            let container_id = input.get_u8();
            world.player_move_up_container(player, container_id);
        }
        0x89 => parse_text_window(world, player, &mut input),
        0x8A => parse_house_window(world, player, &mut input),
        0x8B => parse_wrap_item(world, player, &mut input),
        0x8C => parse_look_at(world, player, &mut input),
        0x8D => {
            let creature_id = input.get_u32();
            world.player_look_in_battle_list(player, creature_id);
        }
        0x8E => {} // join aggression
        0x8F => parse_quick_loot(world, player, &mut input),
        0x96 => parse_say(world, player, &mut input),
        0x97 => world.player_request_channels(player),
        0x98 => {
            let channel_id = input.get_u16();
            world.player_open_channel(player, channel_id);
        }
        0x99 => {
            let channel_id = input.get_u16();
            world.player_close_channel(player, channel_id);
        }
        0x9A => {
            let receiver = input.get_string(None);
            world.player_open_private_channel(player, receiver);
        }
        0x9E => world.player_close_npc_channel(player),
        0xA0 => parse_fight_modes(world, player, &mut input),
        0xA1 => parse_attack(world, player, &mut input),
        0xA2 => parse_follow(world, player, &mut input),
        0xA3 => {
            let target_id = input.get_u32();
            world.player_invite_to_party(player, target_id);
        }
        0xA4 => {
            let target_id = input.get_u32();
            world.player_join_party(player, target_id);
        }
        0xA5 => {
            let target_id = input.get_u32();
            world.player_revoke_party_invite(player, target_id);
        }
        0xA6 => {
            let target_id = input.get_u32();
            world.player_pass_party_leadership(player, target_id);
        }
        0xA7 => world.player_leave_party(player),
        0xA8 => {
            let active = input.get_u8() == 1;
            world.player_enable_shared_party_experience(player, active);
        }
        0xAA => world.player_create_private_channel(player),
        0xAB => {
            let name = input.get_string(None);
            world.player_channel_invite(player, name);
        }
        0xAC => {
            let name = input.get_string(None);
            world.player_channel_exclude(player, name);
        }
        0xBE => world.player_cancel_attack_and_follow(player),
        0xC9 => {} // update tile
        0xCA => {
            let container_id = input.get_u8();
            world.player_update_container(player, container_id);
        }
        0xCB => {
            let pos = input.get_position();
            world.player_browse_field(player, pos);
        }
        0xCC => {
            let container_id = input.get_u8();
            let index = input.get_u16();
            world.player_seek_in_container(player, container_id, index);
        }
        0xD2 => world.player_request_outfit(player),
        0xD3 => parse_set_outfit(world, player, &mut input),
        0xDC => {
            let name = input.get_string(None);
            world.player_add_vip(player, name);
        }
        0xDD => {
            let guid = input.get_u32();
            world.player_remove_vip(player, guid);
        }
        0xDE => parse_edit_vip(world, player, &mut input),
        0xE7 => {} // thank you
        0xE8 => parse_debug_assert(world, player, connection, &mut input),
        0xF2 => parse_rule_violation_report(world, player, &mut input),
        0xF3 => {} // get object info
        0xF4 => world.player_leave_market(player),
        0xF5 => parse_market_browse(world, player, &mut input),
        0xF6 => parse_market_create_offer(world, player, &mut input),
        0xF7 => {
            let timestamp = input.get_u32();
            let counter = input.get_u16();
            world.player_cancel_market_offer(player, timestamp, counter);
        }
        0xF8 => {
            let timestamp = input.get_u32();
            let counter = input.get_u16();
            let amount = input.get_u16();
            world.player_accept_market_offer(player, timestamp, counter, amount);
        }
        0xF9 => {
            let id = input.get_u32();
            let button = input.get_u8();
            let choice = input.get_u8();
            world.player_answer_modal_window(player, id, button, choice);
        }
        _ => world.player_unhandled_command(player, command, input.remaining_buffer()),
    }

    if input.is_overrun() {
        warn!(peer = %connection.peer(), command, "malformed packet");
        detach(state.world.as_mut(), connection);
    }
}

fn parse_extended_opcode(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let opcode = input.get_u8();
    let payload = input.get_string(None);
    world.player_extended_opcode(player, opcode, payload);
}

fn parse_auto_walk(
    world: &mut dyn GameWorld,
    player: PlayerId,
    connection: &Connection,
    input: &mut NetworkMessage,
) {
    let steps = usize::from(input.get_u8());
    if !input.can_read(steps) {
        send::cancel_walk(connection, world.player_direction(player));
        return;
    }

    let mut path: Vec<Direction> = Vec::with_capacity(steps);
    for _ in 0..steps {
        if let Some(direction) = Direction::from_walk_byte(input.get_u8()) {
            path.push(direction);
        }
    }

    if !path.is_empty() {
        // The client sends the path destination-first.
        path.reverse();
        world.player_auto_walk(player, path);
    }
}

fn parse_equip_object(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let sprite_id = input.get_u16();
    input.get_u8(); // smart-equip toggle
    world.player_equip_item(player, sprite_id);
}

fn parse_throw(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let from = input.get_position();
    let sprite_id = input.get_u16();
    let from_stackpos = input.get_u8();
    let to = input.get_position();
    let count = input.get_u8();

    if to != from {
        world.player_move_thing(player, from, sprite_id, from_stackpos, to, count);
    }
}

fn parse_look_in_shop(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let item_id = input.get_u16();
    let count = input.get_u8();
    world.player_look_in_shop(player, item_id, count);
}

fn parse_purchase(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let item_id = input.get_u16();
    let count = input.get_u8();
    let amount = input.get_u16();
    let ignore_cap = input.get_u8() != 0;
    let in_backpacks = input.get_u8() != 0;
    world.player_purchase_item(player, item_id, count, amount, ignore_cap, in_backpacks);
}

fn parse_sale(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let item_id = input.get_u16();
    let count = input.get_u8();
    let amount = input.get_u16();
    let ignore_equipped = input.get_u8() != 0;
    world.player_sell_item(player, item_id, count, amount, ignore_equipped);
}

fn parse_request_trade(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let pos = input.get_position();
    let sprite_id = input.get_u16();
    let stackpos = input.get_u8();
    let partner_id = input.get_u32();
    world.player_request_trade(player, pos, stackpos, partner_id, sprite_id);
}

fn parse_look_in_trade(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let counter_offer = input.get_u8() == 0x01;
    let index = input.get_u8();
    world.player_look_in_trade(player, counter_offer, index);
}

fn parse_use_item(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let pos = input.get_position();
    let sprite_id = input.get_u16();
    let stackpos = input.get_u8();
    let index = input.get_u8();
    world.player_use_item(player, pos, stackpos, index, sprite_id);
}

fn parse_use_item_ex(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let from = input.get_position();
    let from_sprite_id = input.get_u16();
    let from_stackpos = input.get_u8();
    let to = input.get_position();
    let to_sprite_id = input.get_u16();
    let to_stackpos = input.get_u8();
    world.player_use_item_ex(
        player,
        from,
        from_stackpos,
        from_sprite_id,
        to,
        to_stackpos,
        to_sprite_id,
    );
}

fn parse_use_with_creature(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let from = input.get_position();
    let sprite_id = input.get_u16();
    let from_stackpos = input.get_u8();
    let creature_id = input.get_u32();
    world.player_use_with_creature(player, from, from_stackpos, creature_id, sprite_id);
}

fn parse_rotate_item(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let pos = input.get_position();
    let sprite_id = input.get_u16();
    let stackpos = input.get_u8();
    world.player_rotate_item(player, pos, stackpos, sprite_id);
}

fn parse_edit_podium_request(
    world: &mut dyn GameWorld,
    player: PlayerId,
    input: &mut NetworkMessage,
) {
    let pos = input.get_position();
    let sprite_id = input.get_u16();
    let stackpos = input.get_u8();
    world.player_request_edit_podium(player, pos, stackpos, sprite_id);
}

fn parse_text_window(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let window_id = input.get_u32();
    let text = input.get_string(None);
    world.player_write_item(player, window_id, text);
}

fn parse_house_window(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let door_id = input.get_u8();
    let id = input.get_u32();
    let text = input.get_string(None);
    world.player_update_house_window(player, door_id, id, text);
}

fn parse_wrap_item(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let pos = input.get_position();
    let sprite_id = input.get_u16();
    let stackpos = input.get_u8();
    world.player_wrap_item(player, pos, stackpos, sprite_id);
}

fn parse_look_at(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let pos = input.get_position();
    input.get_u16(); // sprite id
    let stackpos = input.get_u8();
    world.player_look_at(player, pos, stackpos);
}

fn parse_quick_loot(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let pos = input.get_position();
    let sprite_id = input.get_u16();
    let stackpos = input.get_u8();
    let all_corpses = input.get_u8() != 0;
    world.player_quick_loot(player, pos, stackpos, sprite_id, all_corpses);
}

fn parse_say(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let class = SpeakClass(input.get_u8());

    let mut receiver = String::new();
    let mut channel_id = 0u16;
    if class.carries_receiver() {
        receiver = input.get_string(None);
    } else if class.carries_channel() {
        channel_id = input.get_u16();
    }

    let text = input.get_string(None);
    if text.chars().count() > 255 {
        return;
    }

    world.player_say(player, channel_id, class, receiver, text);
}

fn parse_fight_modes(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let raw_fight = input.get_u8();
    let raw_chase = input.get_u8();
    let raw_secure = input.get_u8();

    let fight = match raw_fight {
        1 => FightMode::Attack,
        2 => FightMode::Balanced,
        _ => FightMode::Defense,
    };

    world.player_set_fight_modes(
        player,
        FightModes {
            fight,
            chase: raw_chase != 0,
            secure: raw_secure != 0,
        },
    );
}

fn parse_attack(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let creature_id = input.get_u32();
    input.get_u32(); // target sequence
    world.player_set_attacked_creature(player, creature_id);
}

fn parse_follow(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let creature_id = input.get_u32();
    input.get_u32(); // target sequence
    world.player_follow_creature(player, creature_id);
}

fn parse_edit_vip(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let guid = input.get_u32();
    let description = input.get_string(None);
    let icon = input.get_u32().min(10);
    let notify = input.get_u8() != 0;
    world.player_edit_vip(player, guid, description, icon, notify);
}

fn parse_set_outfit(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let outfit_type = input.get_u8();

    let mut outfit = Outfit {
        look_type: input.get_u16(),
        head: input.get_u8(),
        body: input.get_u8(),
        legs: input.get_u8(),
        feet: input.get_u8(),
        addons: input.get_u8(),
        ..Outfit::default()
    };

    match outfit_type {
        // Outfit window.
        0 => {
            outfit.mount = input.get_u16();
            if outfit.mount != 0 {
                outfit.mount_head = input.get_u8();
                outfit.mount_body = input.get_u8();
                outfit.mount_legs = input.get_u8();
                outfit.mount_feet = input.get_u8();
            } else {
                input.get_u32();

                // Keep stored mount colors so dismounting does not reset them.
                let current = world.player_current_outfit(player);
                outfit.mount_head = current.mount_head;
                outfit.mount_body = current.mount_body;
                outfit.mount_legs = current.mount_legs;
                outfit.mount_feet = current.mount_feet;
            }

            input.get_u16(); // familiar looktype
            let randomize_mount = input.get_u8() == 0x01;
            world.player_change_outfit(player, outfit, randomize_mount);
        }
        // Store try-outfit preview; nothing reaches the world.
        1 => {
            input.get_u8();
            input.get_u8();
            input.get_u8();
            input.get_u8();
        }
        // Podium interaction.
        2 => {
            let pos = input.get_position();
            let sprite_id = input.get_u16();
            let stackpos = input.get_u8();
            outfit.mount = input.get_u16();
            outfit.mount_head = input.get_u8();
            outfit.mount_body = input.get_u8();
            outfit.mount_legs = input.get_u8();
            outfit.mount_feet = input.get_u8();
            let direction = input.get_u8();
            let visible = input.get_u8() == 1;
            world.player_edit_podium(player, outfit, pos, stackpos, sprite_id, visible, direction);
        }
        _ => {}
    }
}

fn parse_debug_assert(
    world: &mut dyn GameWorld,
    player: PlayerId,
    connection: &Connection,
    input: &mut NetworkMessage,
) {
    // One report per connection; later ones are dropped unread.
    if !connection.latch_debug_assert() {
        return;
    }

    let assert_line = input.get_string(None);
    let date = input.get_string(None);
    let description = input.get_string(None);
    let comment = input.get_string(None);
    world.player_debug_assert(player, assert_line, date, description, comment);
}

fn parse_rule_violation_report(
    world: &mut dyn GameWorld,
    player: PlayerId,
    input: &mut NetworkMessage,
) {
    let report_type = input.get_u8();
    let reason = input.get_u8();
    let target_name = input.get_string(None);
    let comment = input.get_string(None);
    let mut translation = String::new();
    if report_type == REPORT_TYPE_NAME {
        translation = input.get_string(None);
    } else if report_type == REPORT_TYPE_STATEMENT {
        translation = input.get_string(None);
        input.get_u32(); // statement id, not logged
    }

    world.player_report_rule_violation(player, target_name, report_type, reason, comment, translation);
}

fn parse_market_browse(world: &mut dyn GameWorld, player: PlayerId, input: &mut NetworkMessage) {
    let browse_id = input.get_u8();
    if browse_id == MARKET_BROWSE_OWN_OFFERS {
        world.player_browse_market_own_offers(player);
    } else if browse_id == MARKET_BROWSE_OWN_HISTORY {
        world.player_browse_market_own_history(player);
    } else {
        let sprite_id = input.get_u16();
        world.player_browse_market(player, sprite_id);
    }
}

fn parse_market_create_offer(
    world: &mut dyn GameWorld,
    player: PlayerId,
    input: &mut NetworkMessage,
) {
    let offer_type = input.get_u8();
    let sprite_id = input.get_u16();
    if world.market_offer_needs_tier(sprite_id) {
        input.get_u8();
    }
    let amount = input.get_u16();
    let price = input.get_u64();
    let anonymous = input.get_u8() != 0;
    world.player_create_market_offer(player, offer_type, sprite_id, amount, price, anonymous);
}
