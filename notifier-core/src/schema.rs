use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Text,
        recipient_address -> Nullable<Text>,
        notification_type -> Text,
        channel -> Text,
        status -> Text,
        subject -> Nullable<Text>,
        message -> Nullable<Text>,
        template_id -> Nullable<Text>,
        template_data -> Jsonb,
        related_entity_id -> Nullable<Text>,
        related_entity_type -> Nullable<Text>,
        created_at -> Timestamptz,
        scheduled_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        retry_count -> Integer,
        error_message -> Nullable<Text>,
        metadata -> Jsonb,
    }
}

table! {
    notification_preferences (user_id) {
        user_id -> Text,
        channel_preferences -> Jsonb,
        email_enabled -> Bool,
        in_app_enabled -> Bool,
        sms_enabled -> Bool,
        push_enabled -> Bool,
        immediate_notifications -> Bool,
        digest_frequency -> Text,
        quiet_hours_start -> Text,
        quiet_hours_end -> Text,
        timezone -> Text,
        task_reminders -> Bool,
        reminder_minutes_before -> Integer,
        overdue_notifications -> Bool,
        collaboration_notifications -> Bool,
        system_notifications -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notification_templates (id) {
        id -> Text,
        name -> Text,
        notification_type -> Text,
        channel -> Text,
        subject -> Nullable<Text>,
        html_content -> Nullable<Text>,
        text_content -> Nullable<Text>,
        external_template_ref -> Nullable<Text>,
        active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(
    notifications,
    notification_preferences,
    notification_templates,
);
