use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MemberRole {
    Owner => "owner",
    Admin => "admin",
    Staff => "staff",
    Viewer => "viewer",
});

impl MemberRole {
    /// Owner and admin may manage the organization and override holiday blocks.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

str_enum!(SystemRole {
    SuperAdmin => "super_admin",
    Admin => "admin",
    Support => "support",
    Viewer => "viewer",
});

str_enum!(InvoiceStatus {
    Draft => "draft",
    Open => "open",
    Paid => "paid",
    Canceled => "canceled",
    Overdue => "overdue",
});

impl InvoiceStatus {
    /// Only drafts and open invoices may be deleted.
    pub fn is_deletable(&self) -> bool {
        matches!(self, Self::Draft | Self::Open)
    }
}

str_enum!(PaymentMethod {
    Manual => "manual",
    Cash => "cash",
    Pix => "pix",
    Card => "card",
    Boleto => "boleto",
});

str_enum!(ClientStatus {
    Active => "active",
    Inactive => "inactive",
    Blocked => "blocked",
});

str_enum!(PlanStatus {
    Active => "active",
    Inactive => "inactive",
    Blocked => "blocked",
});

str_enum!(Theme {
    Light => "light",
    Dark => "dark",
});

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}
