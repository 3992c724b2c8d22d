diesel::table! {
    diagnostic_steps (id) {
        id -> Integer,
        problem_id -> Integer,
        device_id -> Nullable<Integer>,
        remote_id -> Nullable<Integer>,
        tv_interface_id -> Nullable<Integer>,
        step_number -> Integer,
        title -> Text,
        description -> Nullable<Text>,
        instruction -> Text,
        hint -> Nullable<Text>,
        highlight_button -> Nullable<Text>,
        highlight_area -> Nullable<Text>,
        media_url -> Nullable<Text>,
        estimated_seconds -> Nullable<Integer>,
        is_active -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    step_actions (id) {
        id -> Integer,
        step_id -> Integer,
        position -> Integer,
        action_type -> Text,
        button -> Nullable<Text>,
        area -> Nullable<Text>,
        description -> Nullable<Text>,
        created_at -> BigInt,
    }
}
