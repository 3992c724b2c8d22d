diesel::table! {
    session_steps (id) {
        id -> Integer,
        session_id -> Text,
        step_id -> Integer,
        problem_id -> Nullable<Integer>,
        device_id -> Nullable<Integer>,
        outcome -> Text,
        notes -> Nullable<Text>,
        duration_seconds -> Nullable<Integer>,
        created_at -> BigInt,
    }
}
