//! Entity metadata driving the generic resource handlers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    /// RFC 3339 timestamp, stored normalised to UTC.
    Date,
    /// Object id of a record in the named collection.
    Ref(&'static str),
    RefList(&'static str),
    Array,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Str(&'static str),
    Bool(bool),
    Now,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    pub trim: bool,
    /// Hashed before storage and never returned.
    pub secret: bool,
    pub email: bool,
    pub allowed: &'static [&'static str],
    pub default: Option<FieldDefault>,
}

impl FieldDef {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            unique: false,
            trim: false,
            secret: false,
            email: false,
            allowed: &[],
            default: None,
        }
    }

    const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    const fn unique(self) -> Self {
        Self {
            unique: true,
            ..self
        }
    }

    const fn trim(self) -> Self {
        Self { trim: true, ..self }
    }

    const fn secret(self) -> Self {
        Self {
            secret: true,
            ..self
        }
    }

    const fn email(self) -> Self {
        Self {
            email: true,
            ..self
        }
    }

    const fn one_of(self, allowed: &'static [&'static str]) -> Self {
        Self { allowed, ..self }
    }

    const fn default(self, default: FieldDefault) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }
}

/// Reference stored inside embedded documents, e.g. `sessions.exercises.exercise`.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub path: &'static str,
    pub target: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    None,
    /// New customer programs become the customer's `current_program`.
    AssignCustomerProgram,
    /// Dickson index, program linkage and coach notification.
    FocusSession,
}

#[derive(Debug)]
pub struct EntityMeta {
    pub collection: &'static str,
    pub label: &'static str,
    pub fields: &'static [FieldDef],
    pub embedded_relations: &'static [Relation],
    pub default_population: &'static [&'static str],
    pub account: bool,
    pub hook: Hook,
}

impl EntityMeta {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn hidden_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.secret).map(|f| f.name)
    }

    pub fn relations(&self) -> impl Iterator<Item = Relation> + '_ {
        self.fields
            .iter()
            .filter_map(|f| match f.kind {
                FieldKind::Ref(target) | FieldKind::RefList(target) => Some(Relation {
                    path: f.name,
                    target,
                }),
                _ => None,
            })
            .chain(self.embedded_relations.iter().copied())
    }

    /// Longest relation that is `path` itself or a dotted prefix of it.
    pub fn resolve_relation(&self, path: &str) -> Option<Relation> {
        self.relations()
            .filter(|r| {
                path == r.path
                    || path
                        .strip_prefix(r.path)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(|r| r.path.len())
    }
}

pub fn entity(collection: &str) -> Option<&'static EntityMeta> {
    ENTITIES.iter().find(|e| e.collection == collection)
}

const STATUSES: &[&str] = &["PENDING", "ACTIVE", "DISABLED"];
const TITLES: &[&str] = &["M.", "Ms.", ""];
const SENDERS: &[&str] = &["COACH", "CUSTOMER"];
const EXERCISE_IMG: &str = "https://greatist.com/sites/default/files/7MinuteWorkout_May_Feat.jpg";

const SESSION_EXERCISES: &[Relation] = &[Relation {
    path: "sessions.exercises.exercise",
    target: "exercises",
}];

use FieldDefault::{Bool, Now, Str};
use FieldKind::{Array, Boolean, Date, Number, Object, Ref, RefList};

const fn text(name: &'static str) -> FieldDef {
    FieldDef::new(name, FieldKind::String)
}

pub static ENTITIES: &[EntityMeta] = &[
    EntityMeta {
        collection: "users",
        label: "User",
        fields: &[
            text("first_name"),
            text("last_name"),
            text("email").required().unique().trim().email(),
            FieldDef::new("age", Number).required(),
            text("password").required().secret(),
            text("phone"),
            text("title").one_of(TITLES).default(Str("")),
            text("img_url").trim(),
            text("status").required().one_of(STATUSES).default(Str("PENDING")),
            FieldDef::new("registration_date", Date).required().default(Now),
            FieldDef::new("last_login_date", Date).required().default(Now),
            FieldDef::new("address", Object),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: true,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "coaches",
        label: "Coach",
        fields: &[
            text("first_name"),
            text("last_name"),
            text("email").required().unique().trim().email(),
            FieldDef::new("age", Number),
            text("password").required().secret(),
            text("phone"),
            text("title").one_of(TITLES).default(Str("")),
            text("img").trim().default(Str(
                "http://laderasoccer.net/wp-content/uploads/2019/02/become-a-coach.png",
            )),
            text("status").required().one_of(STATUSES).default(Str("PENDING")),
            FieldDef::new("registration_date", Date).required().default(Now),
            FieldDef::new("last_login_date", Date).required().default(Now),
            FieldDef::new("address", Object),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: true,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "customers",
        label: "Customer",
        fields: &[
            text("first_name"),
            text("last_name"),
            text("email").required().unique().trim().email(),
            FieldDef::new("current_program", Ref("customerPrograms")),
            FieldDef::new("age", Number),
            text("password").required().secret(),
            text("phone"),
            text("title").one_of(TITLES).default(Str("")),
            text("img").trim().default(Str(
                "https://image.shutterstock.com/image-vector/male-avatar-profile-picture-vector-260nw-149083895.jpg",
            )),
            text("status").required().one_of(STATUSES).default(Str("PENDING")),
            FieldDef::new("registration_date", Date).required().default(Now),
            FieldDef::new("last_login_date", Date).required().default(Now),
            FieldDef::new("address", Object),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: true,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "programs",
        label: "Program",
        fields: &[
            text("name").required(),
            FieldDef::new("coach", Ref("coaches")),
            text("description"),
            FieldDef::new("sessions", Array),
            FieldDef::new("creation_date", Date).default(Now),
        ],
        embedded_relations: SESSION_EXERCISES,
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "customerPrograms",
        label: "CustomerProgram",
        fields: &[
            FieldDef::new("customer", Ref("customers")),
            FieldDef::new("program", Ref("programs")),
            FieldDef::new("sessions", Array),
            FieldDef::new("focus_sessions", RefList("focusSessions")),
            FieldDef::new("creation_date", Date).default(Now),
        ],
        embedded_relations: SESSION_EXERCISES,
        default_population: &["sessions.exercises.exercise"],
        account: false,
        hook: Hook::AssignCustomerProgram,
    },
    EntityMeta {
        collection: "sessions",
        label: "Session",
        fields: &[
            text("name").required(),
            text("description"),
            FieldDef::new("repetitions", Array),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "exercises",
        label: "Exercise",
        fields: &[
            text("name").required(),
            text("description"),
            text("img").default(Str(EXERCISE_IMG)),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "focusExercises",
        label: "FocusExercise",
        fields: &[
            text("name").required(),
            text("description"),
            FieldDef::new("steps", Array),
            FieldDef::new("advice", Array),
            text("img").default(Str(EXERCISE_IMG)),
            FieldDef::new("timed", Boolean).default(Bool(false)),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "focusSessions",
        label: "FocusSession",
        fields: &[
            FieldDef::new("customer", Ref("customers")).required(),
            FieldDef::new("customer_program", Ref("customerPrograms")).required(),
            FieldDef::new("age", Number),
            FieldDef::new("weight", Number),
            text("weight_unit").one_of(&["kg", "lbs"]).default(Str("kg")),
            FieldDef::new("rest_heart_rate", Number),
            FieldDef::new("target_heart_rate", Number),
            FieldDef::new("five_min_rest_hr", Number),
            FieldDef::new("thirty_deflections_hr", Number),
            FieldDef::new("one_min_elongated_hr", Number),
            FieldDef::new("dickson_index", Number),
            FieldDef::new("exercises", RefList("focusExercises")),
            FieldDef::new("results", Array),
            FieldDef::new("due_date", Date).required(),
            FieldDef::new("validation_date", Date),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::FocusSession,
    },
    EntityMeta {
        collection: "appointments",
        label: "Appointment",
        fields: &[
            FieldDef::new("customer", Ref("customers")).required(),
            FieldDef::new("coach", Ref("coaches")).required(),
            text("subject").required(),
            text("description"),
            text("notes"),
            FieldDef::new("slot", Object).required(),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "conversations",
        label: "Conversation",
        fields: &[
            FieldDef::new("customer", Ref("customers")).required(),
            FieldDef::new("coach", Ref("coaches")).required(),
            FieldDef::new("messages", Array),
            FieldDef::new("creation_date", Date).required().default(Now),
            FieldDef::new("updated_date", Date),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
    EntityMeta {
        collection: "notifications",
        label: "Notification",
        fields: &[
            FieldDef::new("customer", Ref("customers")),
            FieldDef::new("coach", Ref("coaches")),
            text("sender").required().one_of(SENDERS),
            text("type")
                .required()
                .one_of(&["REMINDER", "ALERT", "FOCUS_SESSION"]),
            text("content"),
            FieldDef::new("seen", Boolean).default(Bool(false)),
            FieldDef::new("creation_date", Date).default(Now),
            FieldDef::new("updated_date", Date),
        ],
        embedded_relations: &[],
        default_population: &[],
        account: false,
        hook: Hook::None,
    },
];
