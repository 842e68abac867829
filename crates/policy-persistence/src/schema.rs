//! Esquema Diesel (escrito a mano, equivalente a `diesel print-schema`).
//!
//! `user_id = ''` representa el estado compartido de un bloque.

diesel::table! {
    block_states (policy_id, block_id, user_id) {
        policy_id -> Text,
        block_id -> Text,
        user_id -> Text,
        status -> Text,
        version -> BigInt,
        state -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    block_state_history (id) {
        id -> BigInt,
        policy_id -> Text,
        block_id -> Text,
        user_id -> Text,
        version -> BigInt,
        state -> Jsonb,
        recorded_at -> Timestamptz,
    }
}

diesel::table! {
    collection_rows (policy_id, source_id, row_id) {
        policy_id -> Text,
        source_id -> Text,
        row_id -> Text,
        data -> Jsonb,
        content_hash -> Text,
    }
}

diesel::table! {
    dry_run_savepoints (policy_id, savepoint_id) {
        policy_id -> Text,
        savepoint_id -> Text,
        seq -> BigInt,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    dry_run_snapshots (policy_id, savepoint_id, source_id) {
        policy_id -> Text,
        savepoint_id -> Text,
        source_id -> Text,
        seq -> BigInt,
        options -> Jsonb,
        diff -> Jsonb,
    }
}

diesel::table! {
    block_state_savepoints (policy_id, savepoint_id, block_id, user_id) {
        policy_id -> Text,
        savepoint_id -> Text,
        block_id -> Text,
        user_id -> Text,
        state -> Jsonb,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    block_states,
    block_state_history,
    collection_rows,
    dry_run_savepoints,
    dry_run_snapshots,
    block_state_savepoints,
);
