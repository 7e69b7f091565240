diesel::table! {
    processed_commands (idempotency_key) {
        idempotency_key -> Varchar,
        command_id -> Uuid,
        result -> Nullable<Jsonb>,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        stock -> Int4,
        low_stock_threshold -> Int4,
        track_quantity -> Bool,
        is_active -> Bool,
        version -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        product_id -> Uuid,
        owner_key -> Varchar,
        quantity -> Int4,
        reason -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    stock_movements (id) {
        id -> Uuid,
        product_id -> Uuid,
        movement_type -> Varchar,
        quantity -> Int4,
        previous_stock -> Int4,
        new_stock -> Int4,
        reason -> Varchar,
        reference -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(reservations -> products (product_id));
diesel::joinable!(stock_movements -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    processed_commands,
    products,
    reservations,
    stock_movements,
);
