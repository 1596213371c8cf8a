/// Positional argument classification for factory and harness entry points.
///
/// Each argument is a name, an options value or a callback. Arguments are
/// classified once at the boundary into a [`Call`]; later arguments of the
/// same kind override earlier ones.
pub enum Arg<O, F> {
    Name(String),
    Options(O),
    Func(F),
}

impl<O, F> Arg<O, F> {
    pub fn name(name: &str) -> Self {
        Arg::Name(name.to_string())
    }

    pub fn options(options: O) -> Self {
        Arg::Options(options)
    }

    pub fn func(func: F) -> Self {
        Arg::Func(func)
    }
}

/// Canonical call after classification
pub struct Call<O, F> {
    pub name: Option<String>,
    pub options: Option<O>,
    pub func: Option<F>,
}

impl<O, F> Default for Call<O, F> {
    fn default() -> Self {
        Self {
            name: None,
            options: None,
            func: None,
        }
    }
}

impl<O, F> Call<O, F> {
    pub fn classify<I>(args: I) -> Self
    where
        I: IntoIterator<Item = Arg<O, F>>,
    {
        let mut call = Call::default();
        for arg in args {
            match arg {
                Arg::Name(name) => call.name = Some(name),
                Arg::Options(options) => call.options = Some(options),
                Arg::Func(func) => call.func = Some(func),
            }
        }
        call
    }
}
