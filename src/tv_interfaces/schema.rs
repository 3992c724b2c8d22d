diesel::table! {
    tv_interfaces (id) {
        id -> Integer,
        device_id -> Nullable<Integer>,
        name -> Text,
        description -> Nullable<Text>,
        interface_type -> Text,
        screenshot_url -> Nullable<Text>,
        dimensions -> Text,
        clickable_areas -> Text,
        highlight_areas -> Text,
        is_active -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
