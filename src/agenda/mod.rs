//! Monthly appointment calendar with the holiday write block.

pub mod calendar;
pub mod guard;
pub mod service;

pub use guard::{check_write, HolidayOverride, ScheduleError};
pub use service::{
    add_holiday, delete_appointment, delete_holiday, load_month, new_draft, patient_history,
    save, set_attendance, AgendaMonth, AppointmentForm, DayCell, MonthWindow, HISTORY_LIMIT,
};
